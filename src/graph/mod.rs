pub mod embedding;
pub mod recurrence;
