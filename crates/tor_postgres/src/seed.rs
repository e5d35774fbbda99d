//! Load a [`SeedBundle`] into Postgres.
//!
//! Upserts by id inside one transaction, then bumps the id sequences past
//! the seeded ids so later inserts do not collide.

use sqlx::PgPool;
use tracing::info;

use tor_core::error::TorError;
use tor_core::seeds::SeedBundle;

use crate::error::db_err;

pub async fn apply(pool: &PgPool, bundle: &SeedBundle) -> Result<(), TorError> {
    bundle.validate()?;
    let mut tx = pool.begin().await.map_err(db_err)?;

    for u in &bundle.units {
        sqlx::query(
            r#"
            INSERT INTO organizational_units (id, code, name, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET code = EXCLUDED.code, name = EXCLUDED.name, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(u.id.0)
        .bind(&u.code)
        .bind(&u.name)
        .bind(u.is_active)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    for p in &bundle.positions {
        sqlx::query(
            r#"
            INSERT INTO positions (id, name, code, unit_id, level_order, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, code = EXCLUDED.code, unit_id = EXCLUDED.unit_id,
                level_order = EXCLUDED.level_order, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(p.id.0)
        .bind(&p.name)
        .bind(&p.code)
        .bind(p.unit_id.map(|u| u.0))
        .bind(p.level_order)
        .bind(p.is_active)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM position_capabilities WHERE position_id = $1")
            .bind(p.id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for tag in &p.capabilities {
            sqlx::query("INSERT INTO position_capabilities (position_id, tag) VALUES ($1, $2)")
                .bind(p.id.0)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
    }

    for u in &bundle.users {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, position_id, is_active, is_super_admin)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, email = EXCLUDED.email,
                position_id = EXCLUDED.position_id, is_active = EXCLUDED.is_active,
                is_super_admin = EXCLUDED.is_super_admin
            "#,
        )
        .bind(u.id.0)
        .bind(&u.name)
        .bind(&u.email)
        .bind(u.position_id.map(|p| p.0))
        .bind(u.is_active)
        .bind(u.is_super_admin)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    for wf in &bundle.workflows {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, unit_id, name, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET unit_id = EXCLUDED.unit_id, name = EXCLUDED.name, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(wf.id.0)
        .bind(wf.unit_id.0)
        .bind(&wf.name)
        .bind(wf.is_active)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Steps are replaced wholesale; the single-last-step index forbids
        // updating them in place one by one.
        sqlx::query("DELETE FROM workflow_steps WHERE workflow_id = $1")
            .bind(wf.id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for s in &wf.steps {
            sqlx::query(
                r#"
                INSERT INTO workflow_steps (
                    workflow_id, step_number, label, position_id, status_stage,
                    can_revise, is_last_step
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(wf.id.0)
            .bind(s.step_number)
            .bind(&s.label)
            .bind(s.position_id.0)
            .bind(s.status_stage.as_str())
            .bind(s.can_revise)
            .bind(s.is_last_step)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
    }

    for table in ["organizational_units", "positions", "users", "workflows"] {
        sqlx::query(&format!(
            "SELECT setval(pg_get_serial_sequence('{table}', 'id'), \
             GREATEST((SELECT COALESCE(MAX(id), 0) FROM {table}), 1))"
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    tx.commit().await.map_err(db_err)?;
    info!(
        units = bundle.units.len(),
        positions = bundle.positions.len(),
        users = bundle.users.len(),
        workflows = bundle.workflows.len(),
        "seed bundle applied"
    );
    Ok(())
}
