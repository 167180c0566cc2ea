//! Action grammar, the domain-suffix router, and the rule compiler that
//! turns one into the other's stored handler type.

pub mod action;
pub mod compiler;
pub mod suffix;

pub use action::{parse_action, Action};
pub use suffix::SuffixRouter;
