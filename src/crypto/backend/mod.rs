pub mod ristretto_b;
