pub mod backend;
pub mod dkg;
pub mod elgamal;
pub mod hashing;
pub mod keymaker;
pub mod shuffler;
pub mod symmetric;
pub mod zkp;
