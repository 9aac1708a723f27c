pub mod sharelink;
