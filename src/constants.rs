pub const DEFAULT_PROGRESS_INTERVAL_SECONDS: u64 = 5;
pub const BYTES_PER_KB: usize = 1024;

pub const INVALID_BUCKET: &str = "INVALID_EMAIL";
pub const OTHER_BUCKET: &str = "OTHER";
pub const UNDEFINED_COUNTRY: &str = "Undefined";

pub const DOMAIN_SEPARATOR: char = '@';
pub const BUCKET_FILE_EXTENSION: &str = "txt";
pub const MAX_BUCKET_NAME_LEN: usize = 64;

pub const DEFAULT_CONFIG_FILE: &str = "mailsift_config.json";
pub const CHECKPOINT_FILE_NAME: &str = "state.json";
