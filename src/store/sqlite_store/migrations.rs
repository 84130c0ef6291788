use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StoreError;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("schema.sql"))])
}

pub fn apply_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    migrations().to_latest(conn)?;
    Ok(())
}
