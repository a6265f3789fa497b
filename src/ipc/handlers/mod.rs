pub mod backup;
pub mod core;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod terms;
pub mod trends;
