//! End-to-end tests driving the public API with in-memory providers.

mod alert_flow;
mod digest_flow;
mod mock_market;
mod scan_flow;
