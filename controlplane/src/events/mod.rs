pub mod broadcaster;
