//! Command handlers. The client has exactly one job: drive a single
//! backup session end-to-end.

pub mod backup;
