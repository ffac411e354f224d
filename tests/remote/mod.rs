//! BDD coverage for the remote command executor.

mod bdd_steps;
mod scenarios;
mod test_helpers;
