//! Reference Migrator
//!
//! Rewrites every import batch and session entry that embeds an old score
//! identity so that it embeds the new one. Positions and sibling fields are
//! never touched. Safe to re-run: once no referrer holds the old identity
//! a pass finds nothing to do.

use sqlx::SqlitePool;
use tachi_common::{Error, Result};

use crate::db::{imports, sessions};
use crate::models::{replace_score_ids, replace_score_info, ReferencePatchReport};

/// Compare-and-swap attempts per referrer collection before giving up
const MAX_PATCH_ROUNDS: usize = 16;

pub struct ReferenceMigrator {
    db: SqlitePool,
}

impl ReferenceMigrator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Patch both referrer collections, in parallel
    ///
    /// Either collection failing fails the whole call; whatever the other
    /// collection already patched stays patched and a re-run skips it.
    pub async fn migrate(&self, old_id: &str, new_id: &str) -> Result<ReferencePatchReport> {
        if old_id == new_id {
            return Ok(ReferencePatchReport::default());
        }

        let (import_report, session_report) = tokio::try_join!(
            self.patch_import_batches(old_id, new_id),
            self.patch_sessions(old_id, new_id),
        )?;

        let mut report = import_report;
        report.merge(session_report);

        tracing::debug!(
            old_score_id = %old_id,
            new_score_id = %new_id,
            import_entries = report.import_entries_patched,
            session_entries = report.session_entries_patched,
            "Referrers patched"
        );

        Ok(report)
    }

    /// Rewrite every import batch entry holding `old_id`
    ///
    /// **Algorithm:**
    /// 1. Load the raw `score_ids` of every batch containing `old_id`
    /// 2. Replace each matching entry in place
    /// 3. Write back only if the stored text is unchanged since step 1
    /// 4. Repeat until no batch contains `old_id` (a lost swap is re-read)
    pub async fn patch_import_batches(&self, old_id: &str, new_id: &str) -> Result<ReferencePatchReport> {
        let mut report = ReferencePatchReport::default();

        for _ in 0..MAX_PATCH_ROUNDS {
            let referrers = imports::score_ids_referencing(&self.db, old_id).await?;
            if referrers.is_empty() {
                return Ok(report);
            }

            for mut referrer in referrers {
                let replaced = replace_score_ids(&mut referrer.score_ids, old_id, new_id);
                if replaced == 0 {
                    continue;
                }

                if imports::swap_score_ids(&self.db, &referrer.import_id, &referrer.raw, &referrer.score_ids)
                    .await?
                {
                    report.import_documents_patched += 1;
                    report.import_entries_patched += replaced;
                } else {
                    tracing::debug!(
                        import_id = %referrer.import_id,
                        "Import batch changed while patching, re-reading"
                    );
                }
            }
        }

        Err(Error::Internal(format!(
            "Import batches referencing {} kept changing during patching",
            old_id
        )))
    }

    /// Rewrite the `scoreID` of every session entry holding `old_id`
    ///
    /// Same compare-and-swap loop as [`Self::patch_import_batches`];
    /// `isNewScore` is carried through unchanged.
    pub async fn patch_sessions(&self, old_id: &str, new_id: &str) -> Result<ReferencePatchReport> {
        let mut report = ReferencePatchReport::default();

        for _ in 0..MAX_PATCH_ROUNDS {
            let referrers = sessions::entries_referencing(&self.db, old_id).await?;
            if referrers.is_empty() {
                return Ok(report);
            }

            for mut referrer in referrers {
                let replaced = replace_score_info(&mut referrer.entries, old_id, new_id);
                if replaced == 0 {
                    continue;
                }

                if sessions::swap_score_info(&self.db, &referrer.session_id, &referrer.raw, &referrer.entries)
                    .await?
                {
                    report.session_documents_patched += 1;
                    report.session_entries_patched += replaced;
                } else {
                    tracing::debug!(
                        session_id = %referrer.session_id,
                        "Session changed while patching, re-reading"
                    );
                }
            }
        }

        Err(Error::Internal(format!(
            "Sessions referencing {} kept changing during patching",
            old_id
        )))
    }
}
