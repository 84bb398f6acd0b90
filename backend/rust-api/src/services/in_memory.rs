//! In-process backends for tests and local runs without MongoDB or Redis.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::StoreError;
use crate::models::{
    CachedPageAnswer, ContentType, LessonAttempt, LessonAttemptCompletion, LessonAttemptScope,
    NewLessonAttempt, NewPageAttempt, PageAttemptUpdate, QuestionPage, QuestionPageAttempt,
    QuestionType,
};
use crate::services::answer_cache::AnswerCache;
use crate::services::attempt_store::AttemptStore;
use crate::services::question_catalog::QuestionCatalog;

#[derive(Default)]
struct StoreState {
    lesson_attempts: BTreeMap<i64, LessonAttempt>,
    page_attempts: BTreeMap<i64, QuestionPageAttempt>,
    next_lesson_attempt_id: i64,
    next_page_attempt_id: i64,
}

/// Attempt store kept in memory. Enforces one open attempt per scope like the MongoDB index.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    state: RwLock<StoreState>,
    fail_page_inserts: AtomicBool,
    yield_on_lookup: AtomicBool,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following page attempt batch fail as an aborted transaction.
    pub fn set_fail_page_inserts(&self, fail: bool) {
        self.fail_page_inserts.store(fail, Ordering::SeqCst);
    }

    /// Yield to the scheduler after each open attempt lookup, so concurrent callers interleave
    /// between the lookup and the insert.
    pub fn set_yield_on_lookup(&self, enabled: bool) {
        self.yield_on_lookup.store(enabled, Ordering::SeqCst);
    }

    pub async fn lesson_attempt(&self, id: i64) -> Option<LessonAttempt> {
        self.state.read().await.lesson_attempts.get(&id).cloned()
    }

    pub async fn lesson_attempt_count(&self) -> usize {
        self.state.read().await.lesson_attempts.len()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn create_lesson_attempt(&self, attempt: &NewLessonAttempt) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;

        let open_in_scope = state.lesson_attempts.values().any(|existing| {
            !existing.is_complete
                && existing.user_id == attempt.user_id
                && existing.lesson_id == attempt.lesson_id
                && existing.plan_id == attempt.plan_id
                && existing.channel_id == attempt.channel_id
        });
        if open_in_scope {
            return Err(StoreError::Duplicate(format!(
                "open attempt for user {} lesson {}",
                attempt.user_id, attempt.lesson_id
            )));
        }

        state.next_lesson_attempt_id += 1;
        let id = state.next_lesson_attempt_id;
        state.lesson_attempts.insert(
            id,
            LessonAttempt {
                id,
                user_id: attempt.user_id.clone(),
                lesson_id: attempt.lesson_id,
                plan_id: attempt.plan_id,
                channel_id: attempt.channel_id,
                start_time: attempt.start_time,
                end_time: None,
                is_complete: false,
                is_successful: false,
                percentage_score: 0,
            },
        );

        Ok(id)
    }

    async fn create_page_attempts(
        &self,
        pages: &[NewPageAttempt],
    ) -> Result<Vec<QuestionPageAttempt>, StoreError> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        if self.fail_page_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Transaction(
                "page attempt insert aborted".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let mut created = Vec::with_capacity(pages.len());
        for page in pages {
            state.next_page_attempt_id += 1;
            let attempt = QuestionPageAttempt {
                id: state.next_page_attempt_id,
                page_id: page.page_id,
                lesson_attempt_id: page.lesson_attempt_id,
                user_answer: String::new(),
                is_correct: false,
            };
            state.page_attempts.insert(attempt.id, attempt.clone());
            created.push(attempt);
        }

        Ok(created)
    }

    async fn complete_lesson_attempt(
        &self,
        completion: &LessonAttemptCompletion,
        pages: &[PageAttemptUpdate],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let still_open = state
            .lesson_attempts
            .get(&completion.lesson_attempt_id)
            .is_some_and(|attempt| attempt.user_id == completion.user_id && !attempt.is_complete);
        if !still_open {
            return Ok(false);
        }

        for update in pages {
            if let Some(attempt) = state.page_attempts.get_mut(&update.page_attempt_id) {
                if attempt.lesson_attempt_id == update.lesson_attempt_id {
                    attempt.user_answer = update.user_answer.clone();
                    attempt.is_correct = update.is_correct;
                }
            }
        }

        if let Some(attempt) = state.lesson_attempts.get_mut(&completion.lesson_attempt_id) {
            attempt.end_time = Some(completion.end_time);
            attempt.is_complete = true;
            attempt.is_successful = completion.is_successful;
            attempt.percentage_score = completion.percentage_score;
        }
        Ok(true)
    }

    async fn find_open_attempt_by_id(
        &self,
        lesson_attempt_id: i64,
        user_id: &str,
    ) -> Result<Option<LessonAttempt>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .lesson_attempts
            .get(&lesson_attempt_id)
            .filter(|attempt| attempt.user_id == user_id && !attempt.is_complete)
            .cloned())
    }

    async fn find_open_attempt(
        &self,
        scope: &LessonAttemptScope,
    ) -> Result<Option<LessonAttempt>, StoreError> {
        let found = {
            let state = self.state.read().await;
            state
                .lesson_attempts
                .values()
                .find(|attempt| {
                    !attempt.is_complete
                        && attempt.user_id == scope.user_id
                        && attempt.lesson_id == scope.lesson_id
                        && attempt.plan_id == scope.plan_id
                        && attempt.channel_id == scope.channel_id
                })
                .cloned()
        };

        if self.yield_on_lookup.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(found)
    }

    async fn list_page_attempts(
        &self,
        lesson_attempt_id: i64,
    ) -> Result<Vec<QuestionPageAttempt>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .page_attempts
            .values()
            .filter(|attempt| attempt.lesson_attempt_id == lesson_attempt_id)
            .cloned()
            .collect())
    }

    async fn list_lesson_attempts(
        &self,
        user_id: &str,
        lesson_id: i64,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<LessonAttempt>, StoreError> {
        let state = self.state.read().await;
        let mut attempts: Vec<LessonAttempt> = state
            .lesson_attempts
            .values()
            .filter(|attempt| attempt.user_id == user_id && attempt.lesson_id == lesson_id)
            .cloned()
            .collect();
        // None sorts before Some, matching null ordering in MongoDB
        attempts.sort_by_key(|attempt| (attempt.end_time, attempt.id));

        Ok(attempts
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn attempt_belongs_to_user(
        &self,
        user_id: &str,
        lesson_attempt_id: i64,
    ) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .lesson_attempts
            .get(&lesson_attempt_id)
            .is_some_and(|attempt| attempt.user_id == user_id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Answer cache kept in memory. Writes can be switched to fail to simulate an unreachable cache.
#[derive(Default)]
pub struct InMemoryAnswerCache {
    entries: RwLock<HashMap<i64, BTreeMap<i64, CachedPageAnswer>>>,
    fail_writes: AtomicBool,
}

impl InMemoryAnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnswerCache for InMemoryAnswerCache {
    async fn write(
        &self,
        lesson_attempt_id: i64,
        page_attempt_id: i64,
        answer: &CachedPageAnswer,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("answer cache is down".to_string()));
        }

        self.entries
            .write()
            .await
            .entry(lesson_attempt_id)
            .or_default()
            .insert(page_attempt_id, answer.clone());
        Ok(())
    }

    async fn write_all(
        &self,
        lesson_attempt_id: i64,
        answers: &[(i64, CachedPageAnswer)],
    ) -> Result<(), StoreError> {
        if answers.is_empty() {
            return Ok(());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("answer cache is down".to_string()));
        }

        let mut entries = self.entries.write().await;
        let pages = entries.entry(lesson_attempt_id).or_default();
        for (page_attempt_id, answer) in answers {
            pages.insert(*page_attempt_id, answer.clone());
        }
        Ok(())
    }

    async fn read(
        &self,
        lesson_attempt_id: i64,
        page_attempt_id: i64,
    ) -> Result<Option<CachedPageAnswer>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&lesson_attempt_id)
            .and_then(|pages| pages.get(&page_attempt_id))
            .cloned())
    }

    async fn read_all(&self, lesson_attempt_id: i64) -> Result<Vec<QuestionPageAttempt>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&lesson_attempt_id)
            .map(|pages| {
                pages
                    .iter()
                    .map(|(page_attempt_id, answer)| {
                        answer
                            .clone()
                            .into_page_attempt(lesson_attempt_id, *page_attempt_id)
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, lesson_attempt_id: i64) -> Result<(), StoreError> {
        self.entries.write().await.remove(&lesson_attempt_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct CatalogPage {
    lesson_id: i64,
    answer: Option<String>,
}

/// Fixed set of multiple-choice question pages.
#[derive(Default)]
pub struct InMemoryQuestionCatalog {
    pages: BTreeMap<i64, CatalogPage>,
}

impl InMemoryQuestionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_question_page(mut self, lesson_id: i64, page_id: i64, answer: Option<&str>) -> Self {
        self.pages.insert(
            page_id,
            CatalogPage {
                lesson_id,
                answer: answer.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl QuestionCatalog for InMemoryQuestionCatalog {
    async fn list_question_pages(&self, lesson_id: i64) -> Result<Vec<QuestionPage>, StoreError> {
        Ok(self
            .pages
            .iter()
            .filter(|(_, page)| page.lesson_id == lesson_id)
            .map(|(page_id, _)| QuestionPage {
                content_type: ContentType::Question,
                question_type: QuestionType::Multichoice,
                page_id: *page_id,
            })
            .collect())
    }

    async fn canonical_answer(&self, page_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .pages
            .get(&page_id)
            .and_then(|page| page.answer.clone())
            .filter(|answer| !answer.is_empty()))
    }
}
