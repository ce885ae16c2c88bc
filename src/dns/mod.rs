//! DNS record reconciliation: desired-state rows upserted into the hosted
//! zone their domain points at, defended against a co-running external-dns
//! controller by the ownership-marker protocol in [`marker`].

pub mod fingerprint;
pub mod marker;
pub mod provider;
pub mod reconcile;
pub mod route53;
