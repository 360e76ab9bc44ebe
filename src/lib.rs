#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod config;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod job;
pub mod prep;
pub mod rnn;
pub mod training;
