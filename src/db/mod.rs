use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use crate::state::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_marketplace",
    include_str!("../../migrations/001_marketplace.sql"),
)];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Per-connection pragmas; every pooled connection needs them
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    // Journal mode is persistent in the database file
    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        Pool::builder().max_size(1).build(manager).unwrap()
    }

    fn seed_profile(pool: &DbPool, id: &str, email: &str) {
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO profiles (id, email, points, created_at) VALUES (?1, ?2, 0, '2026-01-01T00:00:00.000000Z')",
                params![id, email],
            )
            .unwrap();
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn every_pooled_connection_enforces_foreign_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = create_pool(&tmp.path().join("fk.db")).unwrap();

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        for conn in [&first, &second] {
            let enabled: bool = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert!(enabled);
        }
    }

    #[test]
    fn migrations_run_successfully() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["profiles", "items", "item_images", "swaps"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap(); // Should not error on second run

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn negative_points_rejected() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        seed_profile(&pool, "p1", "a@example.com");

        let result = pool.get().unwrap().execute(
            "UPDATE profiles SET points = points - 1 WHERE id = 'p1'",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_category_rejected() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        seed_profile(&pool, "p1", "a@example.com");

        let result = pool.get().unwrap().execute(
            "INSERT INTO items (id, owner_id, title, category, condition, point_value, created_at, updated_at)
             VALUES ('i1', 'p1', 'Hat', 'pets', 'good', 10, 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn foreign_keys_enforced() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let result = pool.get().unwrap().execute(
            "INSERT INTO items (id, owner_id, title, category, condition, point_value, created_at, updated_at)
             VALUES ('i1', 'nobody', 'Hat', 'men', 'good', 10, 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn exchange_payload_must_match_type() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        seed_profile(&pool, "p1", "a@example.com");
        seed_profile(&pool, "p2", "b@example.com");

        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO items (id, owner_id, title, category, condition, point_value, created_at, updated_at)
             VALUES ('i1', 'p1', 'Hat', 'men', 'good', 10, 'now', 'now')",
            [],
        )
        .unwrap();

        // Point redemption carrying an offered item
        let result = conn.execute(
            "INSERT INTO swaps (id, item_id, offered_item_id, requester_id, owner_id, exchange_type,
                                points_used, created_at, updated_at)
             VALUES ('s1', 'i1', 'i1', 'p2', 'p1', 'point_redemption', 10, 'now', 'now')",
            [],
        );
        assert!(result.is_err());

        conn.execute(
            "INSERT INTO swaps (id, item_id, requester_id, owner_id, exchange_type,
                                points_used, created_at, updated_at)
             VALUES ('s2', 'i1', 'p2', 'p1', 'point_redemption', 10, 'now', 'now')",
            [],
        )
        .unwrap();
    }
}
