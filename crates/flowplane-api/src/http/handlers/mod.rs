pub mod approval;
pub mod run;
pub mod trigger;
pub mod workflow;
