pub mod verdict_policy;
