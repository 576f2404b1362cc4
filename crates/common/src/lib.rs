// scriptdesk-common: document model, normalizer and shared types for the scriptdesk workspace

pub mod delta;
pub mod normalize;
pub mod similarity;
pub mod types;
