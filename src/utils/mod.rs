pub mod validation;

pub use validation::{
    parse_duration, parse_port, parse_range, parse_signal, validate_env_name, validate_port,
};
