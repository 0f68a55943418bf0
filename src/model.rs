pub mod admin;
pub mod student;
pub mod teacher;
