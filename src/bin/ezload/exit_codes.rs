pub const EXIT_OK: i32 = 0;
pub const EXIT_NO_DEVICE: i32 = 10;
pub const EXIT_INVALID_HEX: i32 = 11;
pub const EXIT_WRITE_FAILED: i32 = 12;
pub const EXIT_PROTOCOL: i32 = 13;
