// src/store/postgres.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_postgres::PostgresConnectionManager;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_postgres::types::Json;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::models::core::{ListingDetails, ListingProvenance, ListingRecord, MergeListing};
use crate::models::matching::{
    canonical_pair, CandidateStatus, CandidateUpsert, DedupCandidate, FieldScores,
};
use crate::store::{DedupStore, UnitOfWork, UpsertOutcome};
use crate::utils::db_connect::PgPool;

type OwnedConnection = PooledConnection<'static, PostgresConnectionManager<NoTls>>;

/// Session-level advisory lock key shared by every deduplication run and sweep.
const RUN_LOCK_KEY: i64 = 0x6c69_7374_6475_7065;

const CANDIDATE_COLUMNS: &str = "id, listing_id_1, listing_id_2, overall_score, name_score, location_score,
     price_score, revenue_score, description_score, matched_fields, status, resolved_by,
     resolved_at, created_at, updated_at";

fn row_to_candidate(row: &Row) -> Result<DedupCandidate> {
    let status: String = row.get("status");
    let matched: serde_json::Value = row.get("matched_fields");
    Ok(DedupCandidate {
        id: row.get("id"),
        listing_id_1: row.get("listing_id_1"),
        listing_id_2: row.get("listing_id_2"),
        overall_score: row.get("overall_score"),
        field_scores: FieldScores {
            name: row.get("name_score"),
            location: row.get("location_score"),
            price: row.get("price_score"),
            revenue: row.get("revenue_score"),
            description: row.get("description_score"),
        },
        matched_fields: serde_json::from_value(matched)
            .context("matched_fields is not a list of strings")?,
        status: status.parse::<CandidateStatus>()?,
        resolved_by: row.get("resolved_by"),
        resolved_at: row.get("resolved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub struct PgDedupStore {
    pool: PgPool,
    /// Connection holding the advisory lock while a run is in progress.
    lock_conn: Mutex<Option<OwnedConnection>>,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn load_active_listings(&self) -> Result<Vec<ListingRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for load_active_listings")?;

        let rows = conn
            .query(
                "SELECT l.id, l.title, l.business_name, l.asking_price, l.revenue, l.cash_flow,
                        l.city, l.state, l.zip_code, l.industry, l.broker_name, l.description,
                        l.created_at,
                        (SELECT s.platform FROM public.listing_source s
                          WHERE s.listing_id = l.id
                          ORDER BY s.first_seen_at ASC
                          LIMIT 1) AS source_platform
                 FROM public.listing l
                 WHERE l.is_active = TRUE AND l.is_hidden = FALSE",
                &[],
            )
            .await
            .context("Failed to query active listings")?;

        debug!("Loaded {} active listing rows", rows.len());

        Ok(rows
            .iter()
            .map(|row| ListingRecord {
                id: row.get("id"),
                title: row.get("title"),
                business_name: row.get("business_name"),
                asking_price: row.get("asking_price"),
                revenue: row.get("revenue"),
                cash_flow: row.get("cash_flow"),
                city: row.get("city"),
                state: row.get("state"),
                zip_code: row.get("zip_code"),
                industry: row.get("industry"),
                broker_name: row.get("broker_name"),
                description: row.get("description"),
                source_platform: row.get("source_platform"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn find_candidates_for_listing(&self, listing_id: &str) -> Result<Vec<DedupCandidate>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for find_candidates_for_listing")?;
        let query = format!(
            "SELECT {} FROM public.dedup_candidate
             WHERE listing_id_1 = $1 OR listing_id_2 = $1
             ORDER BY overall_score DESC, listing_id_1, listing_id_2",
            CANDIDATE_COLUMNS
        );
        let rows = conn
            .query(query.as_str(), &[&listing_id])
            .await
            .context(format!("Failed to query candidates for listing {}", listing_id))?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn pending_candidates_above(&self, threshold: f64) -> Result<Vec<DedupCandidate>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for pending_candidates_above")?;
        let query = format!(
            "SELECT {} FROM public.dedup_candidate
             WHERE status = 'PENDING' AND overall_score >= $1
             ORDER BY overall_score DESC, listing_id_1, listing_id_2",
            CANDIDATE_COLUMNS
        );
        let rows = conn
            .query(query.as_str(), &[&threshold])
            .await
            .context("Failed to query pending candidates")?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn listing_provenance(&self, listing_id: &str) -> Result<Option<ListingProvenance>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for listing_provenance")?;
        let row = conn
            .query_opt(
                "SELECT l.first_seen_at, l.is_active,
                        (SELECT COUNT(*) FROM public.listing_source s WHERE s.listing_id = l.id) AS source_count
                 FROM public.listing l
                 WHERE l.id = $1",
                &[&listing_id],
            )
            .await
            .context(format!("Failed to load provenance for listing {}", listing_id))?;
        Ok(row.map(|row| ListingProvenance {
            listing_id: listing_id.to_string(),
            is_active: row.get("is_active"),
            source_count: row.get("source_count"),
            first_seen_at: row.get("first_seen_at"),
        }))
    }

    async fn reject_candidate(&self, listing_id_a: &str, listing_id_b: &str, resolved_by: &str) -> Result<bool> {
        let (first, second) = canonical_pair(listing_id_a, listing_id_b);
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for reject_candidate")?;
        let updated = conn
            .execute(
                "UPDATE public.dedup_candidate
                 SET status = 'REJECTED', resolved_by = $3, resolved_at = NOW(), updated_at = NOW()
                 WHERE listing_id_1 = $1 AND listing_id_2 = $2 AND status = 'PENDING'",
                &[&first, &second, &resolved_by],
            )
            .await
            .context(format!("Failed to reject candidate ({}, {})", first, second))?;
        Ok(updated > 0)
    }

    async fn try_acquire_run_lock(&self) -> Result<bool> {
        let mut held = self.lock_conn.lock().await;
        if held.is_some() {
            return Ok(false);
        }
        let conn = self
            .pool
            .get_owned()
            .await
            .context("Failed to get DB connection for run lock")?;
        let row = conn
            .query_one("SELECT pg_try_advisory_lock($1)", &[&RUN_LOCK_KEY])
            .await
            .context("Failed to request advisory run lock")?;
        let acquired: bool = row.get(0);
        if acquired {
            debug!("Acquired advisory run lock {}", RUN_LOCK_KEY);
            *held = Some(conn);
        }
        Ok(acquired)
    }

    async fn release_run_lock(&self) -> Result<()> {
        let conn = self.lock_conn.lock().await.take();
        if let Some(conn) = conn {
            conn.query_one("SELECT pg_advisory_unlock($1)", &[&RUN_LOCK_KEY])
                .await
                .context("Failed to release advisory run lock")?;
            debug!("Released advisory run lock {}", RUN_LOCK_KEY);
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let conn = self
            .pool
            .get_owned()
            .await
            .context("Failed to get DB connection for unit of work")?;
        conn.batch_execute("BEGIN")
            .await
            .context("Failed to start transaction")?;
        Ok(Box::new(PgUnitOfWork { conn: Some(conn) }))
    }
}

/// One transaction on a dedicated pooled connection.
pub struct PgUnitOfWork {
    conn: Option<OwnedConnection>,
}

impl PgUnitOfWork {
    fn conn(&self) -> Result<&OwnedConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow!("unit of work already finished"))
    }
}

impl Drop for PgUnitOfWork {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Unit of work dropped while open; rolling back");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = conn.batch_execute("ROLLBACK").await {
                        warn!("Rollback of abandoned unit of work failed: {}", e);
                    }
                });
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn group_ids_for(&mut self, listing_ids: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let ids: Vec<String> = listing_ids.to_vec();
        let rows = self
            .conn()?
            .query(
                "SELECT id, dedup_group_id FROM public.listing WHERE id = ANY($1) FOR UPDATE",
                &[&ids],
            )
            .await
            .context("Failed to load dedup groups of cluster members")?;
        let mut groups: HashMap<String, Option<String>> = rows
            .iter()
            .map(|row| (row.get("id"), row.get("dedup_group_id")))
            .collect();
        Ok(listing_ids
            .iter()
            .map(|id| (id.clone(), groups.remove(id).flatten()))
            .collect())
    }

    async fn create_group(&mut self, primary_listing_id: Option<&str>) -> Result<String> {
        let group_id = Uuid::new_v4().to_string();
        self.conn()?
            .execute(
                "INSERT INTO public.dedup_group (id, primary_listing_id, created_at, updated_at)
                 VALUES ($1, $2, NOW(), NOW())",
                &[&group_id, &primary_listing_id],
            )
            .await
            .context("Failed to insert dedup_group")?;
        debug!("Created dedup group {}", group_id);
        Ok(group_id)
    }

    async fn assign_group_if_unset(&mut self, listing_ids: &[String], group_id: &str) -> Result<u64> {
        let ids: Vec<String> = listing_ids.to_vec();
        self.conn()?
            .execute(
                "UPDATE public.listing SET dedup_group_id = $1, updated_at = NOW()
                 WHERE id = ANY($2) AND dedup_group_id IS NULL",
                &[&group_id, &ids],
            )
            .await
            .context(format!("Failed to assign dedup group {}", group_id))
    }

    async fn set_listing_group(&mut self, listing_id: &str, group_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE public.listing SET dedup_group_id = $2, updated_at = NOW() WHERE id = $1",
                &[&listing_id, &group_id],
            )
            .await
            .context(format!("Failed to set dedup group of listing {}", listing_id))?;
        Ok(())
    }

    async fn set_group_primary(&mut self, group_id: &str, listing_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE public.dedup_group SET primary_listing_id = $2, updated_at = NOW() WHERE id = $1",
                &[&group_id, &listing_id],
            )
            .await
            .context(format!("Failed to set primary of dedup group {}", group_id))?;
        Ok(())
    }

    async fn upsert_candidate(&mut self, candidate: &CandidateUpsert) -> Result<UpsertOutcome> {
        let conn = self.conn()?;
        conn.batch_execute("SAVEPOINT candidate_upsert")
            .await
            .context("Failed to create savepoint for candidate upsert")?;

        let proposed_id = Uuid::new_v4().to_string();
        let scores = &candidate.field_scores;
        let result = conn
            .query_opt(
                "INSERT INTO public.dedup_candidate
                 (id, listing_id_1, listing_id_2, overall_score, name_score, location_score,
                  price_score, revenue_score, description_score, matched_fields, status,
                  created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'PENDING', NOW(), NOW())
                 ON CONFLICT (listing_id_1, listing_id_2) DO UPDATE SET
                    overall_score = EXCLUDED.overall_score,
                    name_score = EXCLUDED.name_score,
                    location_score = EXCLUDED.location_score,
                    price_score = EXCLUDED.price_score,
                    revenue_score = EXCLUDED.revenue_score,
                    description_score = EXCLUDED.description_score,
                    matched_fields = EXCLUDED.matched_fields,
                    updated_at = NOW()
                 WHERE public.dedup_candidate.status <> 'MERGED'
                 RETURNING (xmax = 0) AS inserted",
                &[
                    &proposed_id,
                    &candidate.listing_id_1,
                    &candidate.listing_id_2,
                    &candidate.overall_score,
                    &scores.name,
                    &scores.location,
                    &scores.price,
                    &scores.revenue,
                    &scores.description,
                    &Json(&candidate.matched_fields),
                ],
            )
            .await;

        match result {
            Ok(row) => {
                conn.batch_execute("RELEASE SAVEPOINT candidate_upsert")
                    .await
                    .context("Failed to release candidate upsert savepoint")?;
                Ok(match row {
                    Some(row) if row.get::<_, bool>("inserted") => UpsertOutcome::Inserted,
                    Some(_) => UpsertOutcome::Updated,
                    None => UpsertOutcome::SkippedMerged,
                })
            }
            Err(e) => {
                conn.batch_execute("ROLLBACK TO SAVEPOINT candidate_upsert")
                    .await
                    .context("Failed to roll back candidate upsert savepoint")?;
                Err(anyhow::Error::new(e).context(format!(
                    "Failed to upsert candidate ({}, {})",
                    candidate.listing_id_1, candidate.listing_id_2
                )))
            }
        }
    }

    async fn load_merge_listing(&mut self, listing_id: &str) -> Result<Option<MergeListing>> {
        let row = self
            .conn()?
            .query_opt(
                "SELECT id, is_active, dedup_group_id, first_seen_at, last_seen_at,
                        business_name, description, asking_price, revenue, cash_flow, ebitda,
                        industry, city, state, zip_code, broker_name, broker_company,
                        year_established, employees
                 FROM public.listing WHERE id = $1 FOR UPDATE",
                &[&listing_id],
            )
            .await
            .context(format!("Failed to load listing {}", listing_id))?;

        Ok(row.map(|row| MergeListing {
            id: row.get("id"),
            is_active: row.get("is_active"),
            dedup_group_id: row.get("dedup_group_id"),
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
            details: ListingDetails {
                business_name: row.get("business_name"),
                description: row.get("description"),
                asking_price: row.get("asking_price"),
                revenue: row.get("revenue"),
                cash_flow: row.get("cash_flow"),
                ebitda: row.get("ebitda"),
                industry: row.get("industry"),
                city: row.get("city"),
                state: row.get("state"),
                zip_code: row.get("zip_code"),
                broker_name: row.get("broker_name"),
                broker_company: row.get("broker_company"),
                year_established: row.get("year_established"),
                employees: row.get("employees"),
            },
        }))
    }

    async fn reassign_sources(&mut self, from_listing_id: &str, to_listing_id: &str) -> Result<u64> {
        self.conn()?
            .execute(
                "UPDATE public.listing_source SET listing_id = $2 WHERE listing_id = $1",
                &[&from_listing_id, &to_listing_id],
            )
            .await
            .context(format!(
                "Failed to reassign sources from {} to {}",
                from_listing_id, to_listing_id
            ))
    }

    async fn deactivate_listing(&mut self, listing_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE public.listing SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
                &[&listing_id],
            )
            .await
            .context(format!("Failed to deactivate listing {}", listing_id))?;
        Ok(())
    }

    async fn mark_candidate_merged(
        &mut self,
        listing_id_a: &str,
        listing_id_b: &str,
        resolved_by: &str,
    ) -> Result<bool> {
        let (first, second) = canonical_pair(listing_id_a, listing_id_b);
        let updated = self
            .conn()?
            .execute(
                "UPDATE public.dedup_candidate
                 SET status = 'MERGED', resolved_by = $3, resolved_at = NOW(), updated_at = NOW()
                 WHERE listing_id_1 = $1 AND listing_id_2 = $2",
                &[&first, &second, &resolved_by],
            )
            .await
            .context(format!("Failed to mark candidate ({}, {}) merged", first, second))?;
        Ok(updated > 0)
    }

    async fn apply_backfill(
        &mut self,
        listing_id: &str,
        details: &ListingDetails,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE public.listing SET
                    business_name = COALESCE(business_name, $2),
                    description = COALESCE(description, $3),
                    asking_price = COALESCE(asking_price, $4),
                    revenue = COALESCE(revenue, $5),
                    cash_flow = COALESCE(cash_flow, $6),
                    ebitda = COALESCE(ebitda, $7),
                    industry = COALESCE(industry, $8),
                    city = COALESCE(city, $9),
                    state = COALESCE(state, $10),
                    zip_code = COALESCE(zip_code, $11),
                    broker_name = COALESCE(broker_name, $12),
                    broker_company = COALESCE(broker_company, $13),
                    year_established = COALESCE(year_established, $14),
                    employees = COALESCE(employees, $15),
                    last_seen_at = GREATEST(last_seen_at, $16),
                    updated_at = NOW()
                 WHERE id = $1",
                &[
                    &listing_id,
                    &details.business_name,
                    &details.description,
                    &details.asking_price,
                    &details.revenue,
                    &details.cash_flow,
                    &details.ebitda,
                    &details.industry,
                    &details.city,
                    &details.state,
                    &details.zip_code,
                    &details.broker_name,
                    &details.broker_company,
                    &details.year_established,
                    &details.employees,
                    &last_seen_at,
                ],
            )
            .await
            .context(format!("Failed to backfill listing {}", listing_id))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let conn = this
            .conn
            .take()
            .ok_or_else(|| anyhow!("unit of work already finished"))?;
        conn.batch_execute("COMMIT")
            .await
            .context("Failed to commit transaction")?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        if let Some(conn) = this.conn.take() {
            conn.batch_execute("ROLLBACK")
                .await
                .context("Failed to roll back transaction")?;
            info!("Transaction rolled back");
        }
        Ok(())
    }
}
