pub mod catalog;
pub mod core;
pub mod councils;
pub mod lecturers;
pub mod reports;
pub mod scores;
pub mod stats;
pub mod students;
pub mod theses;
pub mod users;
