//! Integration and property tests for Flowcast. All tests live under
//! `tests/`; this crate intentionally exports nothing.
