mod base;
mod v1_to_v2;

pub use base::CREATE_SCHEMA_SQL;
pub use v1_to_v2::UPGRADE_1_TO_2_SQL;
