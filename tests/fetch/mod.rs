//! BDD coverage for the configuration fetch flow.

mod bdd_steps;
mod scenarios;
mod test_helpers;
