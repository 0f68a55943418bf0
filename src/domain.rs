//! Consistency rules over the gradebook tables. Every operation takes the
//! acting principal explicitly and runs on a borrowed connection, so the
//! handlers only translate between HTTP and these calls.

pub mod assignment;
pub mod deletion;
pub mod grading;
pub mod grouping;
