pub mod encouragements;
pub mod health;
pub mod scan;
pub mod verses;
