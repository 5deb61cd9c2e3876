// Tool-output detection: progress lines, failure text, container types.

pub mod container;
pub mod failure;
pub mod progress;
