pub const DEFAULT_CHUNK_SIZE_EMAILS: usize = 10_000;
pub const DEFAULT_SAVE_STATE_INTERVAL: u64 = 1_000_000;
pub const DEFAULT_IO_BUFFER_SIZE_KB: usize = 8;
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "output/sorted_emails";
pub const DEFAULT_STATE_DIRECTORY: &str = "state";

pub const DEFAULT_LOOKUP_URL_TEMPLATE: &str = "https://ipapi.co/{domain}/country/";
pub const DEFAULT_LOOKUP_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 0;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

pub const MAX_CONCURRENT_REQUESTS_LIMIT: usize = 10_000;
pub const MAX_LOOKUP_RETRIES: u32 = 10;
pub const DOMAIN_PLACEHOLDER: &str = "{domain}";

pub const DEFAULT_INPUT_PATTERNS: &[&str] = &[
    "tests/test_emails*.txt",
    "data/emails_1.txt",
    "data/batch_*.txt",
];

pub const DEFAULT_COUNTRY_RULES: &[(&str, &[&str])] = &[
    ("US", &["com", "net", "org", "edu"]),
    ("UK", &["co.uk", "org.uk", "ac.uk"]),
    ("FR", &["fr"]),
    ("DE", &["de"]),
    ("JP", &["jp"]),
    ("RU", &["ru"]),
    ("CN", &["cn"]),
    ("BR", &["com.br"]),
    ("IN", &["in"]),
];
