pub mod audio;
pub mod common;
pub mod configs;
pub mod player;
pub mod source;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_support;
