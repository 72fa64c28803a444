pub mod arch;
pub mod run;
