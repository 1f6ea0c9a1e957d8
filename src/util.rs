pub mod mark_bits;
