pub mod trailer_lookup;
