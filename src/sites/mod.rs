pub mod blogger;
pub mod madara;
pub mod photon;
pub mod ts_reader;
