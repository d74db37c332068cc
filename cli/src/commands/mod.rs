pub mod encouragement;
pub mod scan;
