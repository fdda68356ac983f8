use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;
use crate::models::exam_settings::ExamSettings;

#[async_trait]
pub trait ExamSettingsStore: Send + Sync {
    async fn get(&self, exam_id: i64) -> Result<Option<ExamSettings>>;
    async fn upsert(&self, settings: &ExamSettings) -> Result<ExamSettings>;
}

#[derive(Clone)]
pub struct PgExamSettingsStore {
    pool: PgPool,
}

impl PgExamSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamSettingsStore for PgExamSettingsStore {
    async fn get(&self, exam_id: i64) -> Result<Option<ExamSettings>> {
        let settings = sqlx::query_as::<_, ExamSettings>(
            r#"
            SELECT exam_id, credential_set, exam_module, import_only, validity_hours
            FROM exam_settings
            WHERE exam_id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings)
    }

    async fn upsert(&self, settings: &ExamSettings) -> Result<ExamSettings> {
        let saved = sqlx::query_as::<_, ExamSettings>(
            r#"
            INSERT INTO exam_settings (exam_id, credential_set, exam_module, import_only, validity_hours)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (exam_id) DO UPDATE SET
                credential_set = EXCLUDED.credential_set,
                exam_module = EXCLUDED.exam_module,
                import_only = EXCLUDED.import_only,
                validity_hours = EXCLUDED.validity_hours,
                updated_at = NOW()
            RETURNING exam_id, credential_set, exam_module, import_only, validity_hours
            "#,
        )
        .bind(settings.exam_id)
        .bind(&settings.credential_set)
        .bind(&settings.exam_module)
        .bind(settings.import_only)
        .bind(settings.validity_hours)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }
}
