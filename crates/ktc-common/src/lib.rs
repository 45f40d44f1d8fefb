pub mod logging;
pub mod paths;

pub use logging::{parse_level, FileLogger};
pub use paths::{
    config_dir, data_dir, ktc_config_candidates, ktc_config_dir, ktc_data_dir, ktc_log_dir,
    ktc_system_config_dir,
};
