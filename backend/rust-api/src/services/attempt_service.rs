use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use validator::Validate;

use crate::errors::AttemptError;
use crate::metrics::{
    record_attempt_event, record_cache_hit, record_cache_miss, ANSWERS_SUBMITTED_TOTAL,
    LESSON_SCORE_PERCENT,
};
use crate::models::{
    CachedPageAnswer, CompleteLessonRequest, CompleteLessonResponse, LessonAttempt,
    LessonAttemptCompletion, LessonAttemptScope, LessonAttemptsQuery, NewLessonAttempt,
    NewPageAttempt, PageAttemptUpdate, PermissionForUser, QuestionPageAttempt,
    SubmitAnswerRequest,
};
use crate::services::answer_cache::AnswerCache;
use crate::services::attempt_store::AttemptStore;
use crate::services::question_catalog::QuestionCatalog;

/// Minimum percentage score of a successful lesson attempt.
pub const PASS_THRESHOLD_PERCENT: i32 = 75;

/// Percentage of correct answers, rounded down, and whether it passes.
/// A lesson without question pages always passes with 100.
pub fn score(correct: usize, total: usize) -> (i32, bool) {
    if total == 0 {
        return (100, true);
    }
    let percentage = (correct * 100 / total) as i32;
    (percentage, percentage >= PASS_THRESHOLD_PERCENT)
}

/// Drives the lesson attempt lifecycle across the durable store and the answer cache.
///
/// Answers live only in the cache while an attempt is open; completing the attempt
/// writes them to the store, scores them and closes the attempt.
#[derive(Clone)]
pub struct LessonAttemptService {
    store: Arc<dyn AttemptStore>,
    cache: Arc<dyn AnswerCache>,
    catalog: Arc<dyn QuestionCatalog>,
}

impl LessonAttemptService {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        cache: Arc<dyn AnswerCache>,
        catalog: Arc<dyn QuestionCatalog>,
    ) -> Self {
        Self {
            store,
            cache,
            catalog,
        }
    }

    /// Resume the open attempt of the scope, or start a new one.
    pub async fn try_lesson(
        &self,
        scope: &LessonAttemptScope,
    ) -> Result<Vec<QuestionPageAttempt>, AttemptError> {
        scope.validate()?;

        match self.store.find_open_attempt(scope).await? {
            Some(open) => self.resume_attempt(&open).await,
            None => self.start_attempt(scope).await,
        }
    }

    async fn resume_attempt(
        &self,
        open: &LessonAttempt,
    ) -> Result<Vec<QuestionPageAttempt>, AttemptError> {
        let cached = self.cache.read_all(open.id).await?;
        if !cached.is_empty() {
            record_cache_hit();
            record_attempt_event("resumed");
            tracing::debug!("Lesson attempt {} resumed from cache", open.id);
            return Ok(cached);
        }
        record_cache_miss();

        let stored = self.store.list_page_attempts(open.id).await?;
        if stored.is_empty() {
            return Err(AttemptError::PageAttemptsNotFound(open.id));
        }

        // Reseed with blank answers; the store only holds answers of completed attempts
        self.seed_cache(open.id, &stored).await?;

        record_attempt_event("resumed");
        tracing::info!(
            "Lesson attempt {} resumed from store, {} pages reseeded",
            open.id,
            stored.len()
        );

        Ok(stored
            .into_iter()
            .map(|attempt| QuestionPageAttempt {
                user_answer: String::new(),
                is_correct: false,
                ..attempt
            })
            .collect())
    }

    async fn start_attempt(
        &self,
        scope: &LessonAttemptScope,
    ) -> Result<Vec<QuestionPageAttempt>, AttemptError> {
        let now = Utc::now();
        let lesson_attempt_id = self
            .store
            .create_lesson_attempt(&NewLessonAttempt {
                user_id: scope.user_id.clone(),
                lesson_id: scope.lesson_id,
                plan_id: scope.plan_id,
                channel_id: scope.channel_id,
                start_time: now,
            })
            .await?;

        let pages = self.catalog.list_question_pages(scope.lesson_id).await?;
        let new_pages: Vec<NewPageAttempt> = pages
            .into_iter()
            .map(|page| NewPageAttempt {
                lesson_attempt_id,
                page_id: page.page_id,
                content_type: page.content_type,
                question_type: page.question_type,
                modified: now,
            })
            .collect();

        let created = self.store.create_page_attempts(&new_pages).await?;
        self.seed_cache(lesson_attempt_id, &created).await?;

        record_attempt_event("created");
        tracing::info!(
            "Lesson attempt {} created for user: {} lesson: {} with {} question pages",
            lesson_attempt_id,
            scope.user_id,
            scope.lesson_id,
            created.len()
        );

        Ok(created)
    }

    /// Writes blank answers for every page attempt in one batch. On failure the lesson
    /// attempt's entries are dropped so a later resume reseeds the full set.
    async fn seed_cache(
        &self,
        lesson_attempt_id: i64,
        pages: &[QuestionPageAttempt],
    ) -> Result<(), AttemptError> {
        let seeds: Vec<(i64, CachedPageAnswer)> = pages
            .iter()
            .map(|attempt| (attempt.id, CachedPageAnswer::unanswered(attempt.page_id)))
            .collect();

        if let Err(e) = self.cache.write_all(lesson_attempt_id, &seeds).await {
            tracing::error!(
                "Failed to seed answer cache for lesson attempt {}: {}",
                lesson_attempt_id,
                e
            );
            if let Err(clear_err) = self.cache.clear(lesson_attempt_id).await {
                tracing::warn!(
                    "Failed to clear partial cache of lesson attempt {}: {}",
                    lesson_attempt_id,
                    clear_err
                );
            }
            return Err(AttemptError::CacheSync(e));
        }

        Ok(())
    }

    /// Grade an answer against the canonical one and record it in the cache.
    /// The page attempt must have been seeded for this lesson attempt and page.
    pub async fn submit_answer(&self, req: &SubmitAnswerRequest) -> Result<(), AttemptError> {
        req.validate()?;

        let seeded = self
            .cache
            .read(req.lesson_attempt_id, req.page_attempt_id)
            .await
            .map_err(AttemptError::CacheSync)?
            .ok_or(AttemptError::PageAttemptNotFound(req.page_attempt_id))?;
        // entries without a page_id deserialize to 0
        if seeded.page_id != 0 && seeded.page_id != req.page_id {
            return Err(AttemptError::PageMismatch {
                page_attempt_id: req.page_attempt_id,
                page_id: req.page_id,
            });
        }

        let canonical = self
            .catalog
            .canonical_answer(req.page_id)
            .await?
            .ok_or(AttemptError::AnswerNotFound(req.page_id))?;

        let is_correct = req.user_answer == canonical;
        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if is_correct { "true" } else { "false" }])
            .inc();

        self.cache
            .write(
                req.lesson_attempt_id,
                req.page_attempt_id,
                &CachedPageAnswer {
                    page_id: req.page_id,
                    user_answer: req.user_answer.clone(),
                    is_correct,
                },
            )
            .await
            .map_err(AttemptError::CacheSync)?;

        tracing::debug!(
            "Answer recorded for lesson attempt {} page attempt {} (correct: {})",
            req.lesson_attempt_id,
            req.page_attempt_id,
            is_correct
        );

        Ok(())
    }

    /// Persist cached answers, score them and close the attempt.
    pub async fn complete_lesson(
        &self,
        req: &CompleteLessonRequest,
    ) -> Result<CompleteLessonResponse, AttemptError> {
        req.validate()?;
        let lesson_attempt_id = req.lesson_attempt_id;

        if self
            .store
            .find_open_attempt_by_id(lesson_attempt_id, &req.user_id)
            .await?
            .is_none()
        {
            return Err(AttemptError::LessonAttemptNotFound(lesson_attempt_id));
        }

        let stored = self.store.list_page_attempts(lesson_attempt_id).await?;
        let mut answers = self.cache.read_all(lesson_attempt_id).await?;
        if answers.is_empty() {
            tracing::warn!(
                "No cached answers for lesson attempt {}, scoring stored page attempts",
                lesson_attempt_id
            );
            answers = stored.clone();
        }

        let known: HashSet<i64> = stored.iter().map(|attempt| attempt.id).collect();
        let now = Utc::now();
        let mut updates = Vec::with_capacity(answers.len());
        for answer in answers {
            if !known.contains(&answer.id) {
                tracing::warn!(
                    "Skipping unknown page attempt {} for lesson attempt {}",
                    answer.id,
                    lesson_attempt_id
                );
                continue;
            }
            updates.push(PageAttemptUpdate {
                page_attempt_id: answer.id,
                lesson_attempt_id,
                user_answer: answer.user_answer,
                is_correct: answer.is_correct,
                modified: now,
            });
        }

        let total = updates.len();
        let correct = updates.iter().filter(|update| update.is_correct).count();
        let (percentage_score, is_successful) = score(correct, total);

        let completion = LessonAttemptCompletion {
            lesson_attempt_id,
            user_id: req.user_id.clone(),
            end_time: now,
            is_successful,
            percentage_score,
        };
        let completed = self
            .store
            .complete_lesson_attempt(&completion, &updates)
            .await?;
        if !completed {
            return Err(AttemptError::LessonAttemptNotFound(lesson_attempt_id));
        }

        if let Err(e) = self.cache.clear(lesson_attempt_id).await {
            tracing::warn!(
                "Failed to clear cached answers of lesson attempt {}: {}",
                lesson_attempt_id,
                e
            );
        }

        record_attempt_event("completed");
        LESSON_SCORE_PERCENT.observe(f64::from(percentage_score));
        tracing::info!(
            "Lesson attempt {} completed: {}/{} correct, score {} (successful: {})",
            lesson_attempt_id,
            correct,
            total,
            percentage_score,
            is_successful
        );

        Ok(CompleteLessonResponse {
            id: lesson_attempt_id,
            is_successful,
            percentage_score,
        })
    }

    pub async fn list_lesson_attempts(
        &self,
        query: &LessonAttemptsQuery,
    ) -> Result<Vec<LessonAttempt>, AttemptError> {
        query.validate()?;

        let attempts = self
            .store
            .list_lesson_attempts(
                &query.user_id,
                query.lesson_id,
                query.limit_or_default(),
                query.offset_or_default(),
            )
            .await?;

        Ok(attempts)
    }

    pub async fn check_permission(&self, req: &PermissionForUser) -> Result<bool, AttemptError> {
        req.validate()?;

        let allowed = self
            .store
            .attempt_belongs_to_user(&req.user_id, req.lesson_attempt_id)
            .await?;

        Ok(allowed)
    }

    /// Like [`check_permission`](Self::check_permission) but fails when the user is not the owner.
    pub async fn ensure_owner(&self, req: &PermissionForUser) -> Result<(), AttemptError> {
        if self.check_permission(req).await? {
            Ok(())
        } else {
            tracing::warn!(
                "User {} denied access to lesson attempt {}",
                req.user_id,
                req.lesson_attempt_id
            );
            Err(AttemptError::PermissionDenied(req.lesson_attempt_id))
        }
    }
}
