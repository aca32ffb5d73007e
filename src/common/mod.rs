// Leaf utilities shared by the pipeline stages

pub mod amount;
pub mod tax_id;
