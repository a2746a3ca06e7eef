mod driver;
mod run;

pub use run::run;
