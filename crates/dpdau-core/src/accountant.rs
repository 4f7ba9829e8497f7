//! Privacy accountant: durable release ledger plus naive, advanced, and
//! Rényi-DP composition bookkeeping (§4.5).

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::{CoreError, CoreResult};

fn month_key(day_iso: &str) -> &str {
    &day_iso[0..7]
}

/// Per-metric monthly epsilon caps.
#[derive(Debug, Clone, Copy)]
pub struct BudgetCaps {
    pub dau: f64,
    pub mau: f64,
}

impl BudgetCaps {
    pub fn for_metric(&self, metric: &str) -> f64 {
        if metric == "dau" {
            self.dau
        } else {
            self.mau
        }
    }
}

/// A single Rényi-DP point: divergence `epsilon_alpha` at order `alpha`.
#[derive(Debug, Clone, Copy)]
pub struct RdpPoint {
    pub alpha: f64,
    pub epsilon_alpha: f64,
}

/// Combined naive/RDP/advanced-composition view for one `(metric, period)`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BudgetSnapshot {
    pub metric: String,
    pub day: String,
    pub period: String,
    pub spent_naive: f64,
    pub release_count: u64,
    pub rdp_orders: Vec<f64>,
    pub rdp_curve: Vec<(f64, f64)>,
    pub best_rdp_epsilon: Option<f64>,
    pub best_rdp_alpha: Option<f64>,
    pub advanced_epsilon: Option<f64>,
    pub advanced_delta: Option<f64>,
    pub composition: String,
}

impl BudgetSnapshot {
    pub fn as_json(&self, cap: f64, delta: f64) -> serde_json::Value {
        serde_json::json!({
            "metric": self.metric,
            "day": self.day,
            "period": self.period,
            "spent_naive": self.spent_naive,
            "release_count": self.release_count,
            "rdp_orders": self.rdp_orders,
            "rdp_curve": self.rdp_curve,
            "best_rdp_epsilon": self.best_rdp_epsilon,
            "best_rdp_alpha": self.best_rdp_alpha,
            "advanced_epsilon": self.advanced_epsilon,
            "advanced_delta": self.advanced_delta,
            "composition": self.composition,
            "policy": { "cap": cap, "delta": delta },
        })
    }
}

pub struct PrivacyAccountant {
    conn: Mutex<Connection>,
}

impl PrivacyAccountant {
    pub fn open(path: &std::path::Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::InvalidConfig(format!(
                    "failed to create accountant directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::ensure_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn ensure_tables(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric TEXT NOT NULL,
                day TEXT NOT NULL,
                period TEXT NOT NULL,
                epsilon REAL NOT NULL,
                delta REAL NOT NULL,
                mechanism TEXT NOT NULL,
                seed INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_releases_period ON releases(metric, period);

            CREATE TABLE IF NOT EXISTS rdp_releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric TEXT NOT NULL,
                day TEXT NOT NULL,
                period TEXT NOT NULL,
                alpha REAL NOT NULL,
                epsilon_alpha REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_rdp_period ON rdp_releases(metric, period);",
        )?;
        Ok(())
    }

    pub fn can_release(&self, metric: &str, epsilon: f64, day_iso: &str, cap: f64) -> CoreResult<bool> {
        let spent = self.spent_budget(metric, day_iso)?;
        Ok(spent + epsilon <= cap + 1e-9)
    }

    pub fn spent_budget(&self, metric: &str, day_iso: &str) -> CoreResult<f64> {
        let period = month_key(day_iso);
        let conn = self.conn.lock();
        let value: f64 = conn.query_row(
            "SELECT COALESCE(SUM(epsilon), 0) FROM releases WHERE metric = ?1 AND period = ?2",
            params![metric, period],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    pub fn remaining_budget(&self, metric: &str, day_iso: &str, cap: f64) -> CoreResult<f64> {
        Ok((cap - self.spent_budget(metric, day_iso)?).max(0.0))
    }

    pub fn monthly_release_count(&self, metric: &str, day_iso: &str) -> CoreResult<u64> {
        let period = month_key(day_iso);
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM releases WHERE metric = ?1 AND period = ?2",
            params![metric, period],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_release(
        &self,
        metric: &str,
        day_iso: &str,
        epsilon: f64,
        delta: f64,
        mechanism: &str,
        seed: u64,
    ) -> CoreResult<()> {
        let period = month_key(day_iso);
        self.conn.lock().execute(
            "INSERT INTO releases (metric, day, period, epsilon, delta, mechanism, seed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![metric, day_iso, period, epsilon, delta, mechanism, seed as i64],
        )?;
        Ok(())
    }

    pub fn reset_month(&self, metric: &str, period: &str) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM releases WHERE metric = ?1 AND period = ?2",
            params![metric, period],
        )?;
        conn.execute(
            "DELETE FROM rdp_releases WHERE metric = ?1 AND period = ?2",
            params![metric, period],
        )?;
        Ok(())
    }

    /// Appends Rényi-DP points. Rejects `alpha <= 1` or negative `epsilon_alpha`
    /// up front so a bad point never enters the durable ledger.
    pub fn log_rdp_points(&self, metric: &str, day_iso: &str, points: &[RdpPoint]) -> CoreResult<()> {
        for point in points {
            if point.alpha <= 1.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "rdp order alpha must be > 1, got {}",
                    point.alpha
                )));
            }
            if point.epsilon_alpha < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "rdp epsilon_alpha must be >= 0, got {}",
                    point.epsilon_alpha
                )));
            }
        }
        let period = month_key(day_iso);
        let conn = self.conn.lock();
        for point in points {
            conn.execute(
                "INSERT INTO rdp_releases (metric, day, period, alpha, epsilon_alpha)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![metric, day_iso, period, point.alpha, point.epsilon_alpha],
            )?;
        }
        Ok(())
    }

    /// Sum of `epsilon_alpha` per order over the month, restricted to `orders`
    /// when given.
    pub fn spent_rdp(&self, metric: &str, day_iso: &str, orders: Option<&[f64]>) -> CoreResult<Vec<(f64, f64)>> {
        let period = month_key(day_iso);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT alpha, SUM(epsilon_alpha) FROM rdp_releases
             WHERE metric = ?1 AND period = ?2 GROUP BY alpha ORDER BY alpha ASC",
        )?;
        let rows: Vec<(f64, f64)> = stmt
            .query_map(params![metric, period], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match orders {
            None => rows,
            Some(orders) => rows.into_iter().filter(|(alpha, _)| orders.contains(alpha)).collect(),
        })
    }

    /// `epsilon* = min_alpha (epsilon_alpha + ln(1/delta) / (alpha - 1))`.
    /// `None` when there are no logged points for this metric/month.
    pub fn best_rdp_epsilon(
        &self,
        metric: &str,
        day_iso: &str,
        delta: f64,
        orders: Option<&[f64]>,
    ) -> CoreResult<Option<(f64, f64)>> {
        let points = self.spent_rdp(metric, day_iso, orders)?;
        let ln_inv_delta = (1.0 / delta).ln();
        Ok(points
            .into_iter()
            .map(|(alpha, eps_alpha)| (eps_alpha + ln_inv_delta / (alpha - 1.0), alpha))
            .min_by(|a, b| a.0.total_cmp(&b.0)))
    }

    /// `epsilon_bound = sqrt(2 * ln(1/delta') * sum(eps_i^2)) + sum(eps_i * (e^eps_i - 1))`,
    /// `delta_bound = sum(delta_i) + delta'`.
    pub fn advanced_epsilon_delta(&self, metric: &str, day_iso: &str, advanced_delta: f64) -> CoreResult<(f64, f64)> {
        let period = month_key(day_iso);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT epsilon, delta FROM releases WHERE metric = ?1 AND period = ?2",
        )?;
        let releases: Vec<(f64, f64)> = stmt
            .query_map(params![metric, period], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let sum_eps_sq: f64 = releases.iter().map(|(eps, _)| eps * eps).sum();
        let sum_eps_term: f64 = releases.iter().map(|(eps, _)| eps * (eps.exp() - 1.0)).sum();
        let sum_delta: f64 = releases.iter().map(|(_, delta)| delta).sum();

        let epsilon_bound = (2.0 * (1.0 / advanced_delta).ln() * sum_eps_sq).sqrt() + sum_eps_term;
        Ok((epsilon_bound, sum_delta + advanced_delta))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn budget_snapshot(
        &self,
        metric: &str,
        day_iso: &str,
        cap: f64,
        delta: f64,
        orders: &[f64],
        advanced_delta: f64,
    ) -> CoreResult<BudgetSnapshot> {
        let _ = cap;
        let spent_naive = self.spent_budget(metric, day_iso)?;
        let release_count = self.monthly_release_count(metric, day_iso)?;
        let rdp_curve = self.spent_rdp(metric, day_iso, Some(orders))?;
        let best = self.best_rdp_epsilon(metric, day_iso, delta, Some(orders))?;
        let (advanced_epsilon, advanced_delta_total) = self.advanced_epsilon_delta(metric, day_iso, advanced_delta)?;

        let composition = if delta > 0.0 && best.is_some() { "rdp" } else { "naive" };

        Ok(BudgetSnapshot {
            metric: metric.to_string(),
            day: day_iso.to_string(),
            period: month_key(day_iso).to_string(),
            spent_naive,
            release_count,
            rdp_orders: orders.to_vec(),
            rdp_curve,
            best_rdp_epsilon: best.map(|(eps, _)| eps),
            best_rdp_alpha: best.map(|(_, alpha)| alpha),
            advanced_epsilon: Some(advanced_epsilon),
            advanced_delta: Some(advanced_delta_total),
            composition: composition.to_string(),
        })
    }
}
