pub mod creator;
pub mod dag;
pub mod epoch_proof;
pub mod extender;
pub mod random_source;
