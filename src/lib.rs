//! Bionic - terminal front end for the cognitive dispatch brain

pub mod local;
