use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{ClientSession, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::metrics::track_db_operation;
use crate::models::{
    ContentType, LessonAttempt, LessonAttemptCompletion, LessonAttemptScope, NewLessonAttempt,
    NewPageAttempt, PageAttemptUpdate, QuestionPageAttempt, QuestionType,
};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

/// Durable record of lesson attempts and their question page attempts.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert an open lesson attempt and return its id.
    /// Fails with [`StoreError::Duplicate`] when the scope already has an open attempt.
    async fn create_lesson_attempt(&self, attempt: &NewLessonAttempt) -> Result<i64, StoreError>;

    /// Insert all page attempts in one transaction, in input order.
    async fn create_page_attempts(
        &self,
        pages: &[NewPageAttempt],
    ) -> Result<Vec<QuestionPageAttempt>, StoreError>;

    /// Persist the final page answers and close the lesson attempt in one transaction.
    /// Returns false, writing nothing, when the user has no such open attempt.
    async fn complete_lesson_attempt(
        &self,
        completion: &LessonAttemptCompletion,
        pages: &[PageAttemptUpdate],
    ) -> Result<bool, StoreError>;

    /// The user's lesson attempt with this id, if it is still open.
    async fn find_open_attempt_by_id(
        &self,
        lesson_attempt_id: i64,
        user_id: &str,
    ) -> Result<Option<LessonAttempt>, StoreError>;

    async fn find_open_attempt(
        &self,
        scope: &LessonAttemptScope,
    ) -> Result<Option<LessonAttempt>, StoreError>;

    /// Page attempts of a lesson attempt, ordered by id.
    async fn list_page_attempts(
        &self,
        lesson_attempt_id: i64,
    ) -> Result<Vec<QuestionPageAttempt>, StoreError>;

    /// A user's attempts at a lesson, ordered by end time (open attempts first).
    async fn list_lesson_attempts(
        &self,
        user_id: &str,
        lesson_id: i64,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<LessonAttempt>, StoreError>;

    async fn attempt_belongs_to_user(
        &self,
        user_id: &str,
        lesson_attempt_id: i64,
    ) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub const LESSON_ATTEMPTS: &str = "lesson_attempts";
pub const PAGE_ATTEMPTS: &str = "question_page_attempts";
const COUNTERS: &str = "counters";

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Serialize, Deserialize)]
struct LessonAttemptDocument {
    #[serde(rename = "_id")]
    id: i64,
    user_id: String,
    lesson_id: i64,
    plan_id: i64,
    channel_id: i64,
    start_time: BsonDateTime,
    end_time: Option<BsonDateTime>,
    is_complete: bool,
    is_successful: bool,
    percentage_score: i32,
}

impl From<LessonAttemptDocument> for LessonAttempt {
    fn from(doc: LessonAttemptDocument) -> Self {
        LessonAttempt {
            id: doc.id,
            user_id: doc.user_id,
            lesson_id: doc.lesson_id,
            plan_id: doc.plan_id,
            channel_id: doc.channel_id,
            start_time: bson_to_chrono(doc.start_time),
            end_time: doc.end_time.map(bson_to_chrono),
            is_complete: doc.is_complete,
            is_successful: doc.is_successful,
            percentage_score: doc.percentage_score,
        }
    }
}

/// Page, question and multiple-choice attempt flattened into one document.
#[derive(Debug, Serialize, Deserialize)]
struct PageAttemptDocument {
    #[serde(rename = "_id")]
    id: i64,
    lesson_attempt_id: i64,
    page_id: i64,
    content_type: ContentType,
    question_type: QuestionType,
    #[serde(default)]
    user_answer: String,
    #[serde(default)]
    is_correct: bool,
    modified: BsonDateTime,
}

impl From<PageAttemptDocument> for QuestionPageAttempt {
    fn from(doc: PageAttemptDocument) -> Self {
        QuestionPageAttempt {
            id: doc.id,
            page_id: doc.page_id,
            lesson_attempt_id: doc.lesson_attempt_id,
            user_answer: doc.user_answer,
            is_correct: doc.is_correct,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CounterDocument {
    seq: i64,
}

pub struct MongoAttemptStore {
    mongo: Database,
}

impl MongoAttemptStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn lesson_attempts(&self) -> Collection<LessonAttemptDocument> {
        self.mongo.collection(LESSON_ATTEMPTS)
    }

    fn page_attempts(&self) -> Collection<PageAttemptDocument> {
        self.mongo.collection(PAGE_ATTEMPTS)
    }

    /// Creates the indexes the store relies on. Safe to call on every start.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let open_attempt_per_scope = IndexModel::builder()
            .keys(doc! { "user_id": 1, "lesson_id": 1, "plan_id": 1, "channel_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("open_attempt_per_scope".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "is_complete": false })
                    .build(),
            )
            .build();
        let attempts_by_user_lesson = IndexModel::builder()
            .keys(doc! { "user_id": 1, "lesson_id": 1, "end_time": 1 })
            .options(
                IndexOptions::builder()
                    .name("attempts_by_user_lesson".to_string())
                    .build(),
            )
            .build();

        self.lesson_attempts()
            .create_indexes([open_attempt_per_scope, attempts_by_user_lesson])
            .await?;

        self.page_attempts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "lesson_attempt_id": 1, "_id": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("pages_by_lesson_attempt".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        tracing::info!("Attempt store indexes ensured");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<ClientSession, StoreError> {
        let mut session = self
            .mongo
            .client()
            .start_session()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        session
            .start_transaction()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(session)
    }

    async fn abort(session: &mut ClientSession, what: &str) {
        if let Err(abort_err) = session.abort_transaction().await {
            tracing::error!("Failed to abort {} transaction: {}", what, abort_err);
        }
    }

    /// Writes the page answers, then closes the lesson row if it is still open.
    /// Returns false when the lesson row did not match; the caller aborts in that case.
    async fn apply_completion(
        &self,
        session: &mut ClientSession,
        completion: &LessonAttemptCompletion,
        pages: &[PageAttemptUpdate],
    ) -> mongodb::error::Result<bool> {
        for page in pages {
            self.page_attempts()
                .update_one(
                    doc! {
                        "_id": page.page_attempt_id,
                        "lesson_attempt_id": page.lesson_attempt_id,
                    },
                    doc! {
                        "$set": {
                            "user_answer": &page.user_answer,
                            "is_correct": page.is_correct,
                            "modified": chrono_to_bson(page.modified),
                        }
                    },
                )
                .session(&mut *session)
                .await?;
        }

        let closed = self
            .lesson_attempts()
            .update_one(
                doc! {
                    "_id": completion.lesson_attempt_id,
                    "user_id": &completion.user_id,
                    "is_complete": false,
                },
                doc! {
                    "$set": {
                        "end_time": chrono_to_bson(completion.end_time),
                        "is_complete": true,
                        "is_successful": completion.is_successful,
                        "percentage_score": completion.percentage_score,
                    }
                },
            )
            .session(&mut *session)
            .await?;

        Ok(closed.matched_count > 0)
    }

    /// Reserves `count` consecutive ids from the named sequence and returns the first one.
    async fn reserve_ids(&self, sequence: &str, count: i64) -> Result<i64, StoreError> {
        let counter = track_db_operation("find_one_and_update", COUNTERS, async {
            self.mongo
                .collection::<CounterDocument>(COUNTERS)
                .find_one_and_update(doc! { "_id": sequence }, doc! { "$inc": { "seq": count } })
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
                .map_err(StoreError::from)
        })
        .await?
        .ok_or_else(|| StoreError::Malformed(format!("counter {} was not returned", sequence)))?;

        Ok(counter.seq - count + 1)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY_CODE
    )
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn create_lesson_attempt(&self, attempt: &NewLessonAttempt) -> Result<i64, StoreError> {
        let id = self.reserve_ids(LESSON_ATTEMPTS, 1).await?;

        let document = LessonAttemptDocument {
            id,
            user_id: attempt.user_id.clone(),
            lesson_id: attempt.lesson_id,
            plan_id: attempt.plan_id,
            channel_id: attempt.channel_id,
            start_time: chrono_to_bson(attempt.start_time),
            end_time: None,
            is_complete: false,
            is_successful: false,
            percentage_score: 0,
        };

        track_db_operation("insert_one", LESSON_ATTEMPTS, async {
            self.lesson_attempts()
                .insert_one(&document)
                .await
                .map_err(|e| {
                    if is_duplicate_key(&e) {
                        StoreError::Duplicate(format!(
                            "open attempt for user {} lesson {}",
                            attempt.user_id, attempt.lesson_id
                        ))
                    } else {
                        StoreError::from(e)
                    }
                })
        })
        .await?;

        tracing::debug!("Lesson attempt stored in MongoDB: {}", id);
        Ok(id)
    }

    async fn create_page_attempts(
        &self,
        pages: &[NewPageAttempt],
    ) -> Result<Vec<QuestionPageAttempt>, StoreError> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self.reserve_ids(PAGE_ATTEMPTS, pages.len() as i64).await?;
        let documents: Vec<PageAttemptDocument> = pages
            .iter()
            .zip(first_id..)
            .map(|(page, id)| PageAttemptDocument {
                id,
                lesson_attempt_id: page.lesson_attempt_id,
                page_id: page.page_id,
                content_type: page.content_type,
                question_type: page.question_type,
                user_answer: String::new(),
                is_correct: false,
                modified: chrono_to_bson(page.modified),
            })
            .collect();

        let mut session = self.begin_transaction().await?;

        let inserted = track_db_operation("insert_many", PAGE_ATTEMPTS, async {
            self.page_attempts()
                .insert_many(&documents)
                .session(&mut session)
                .await
        })
        .await;

        if let Err(e) = inserted {
            Self::abort(&mut session, "page attempts").await;
            return Err(StoreError::Transaction(e.to_string()));
        }

        session
            .commit_transaction()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        Ok(documents.into_iter().map(QuestionPageAttempt::from).collect())
    }

    async fn complete_lesson_attempt(
        &self,
        completion: &LessonAttemptCompletion,
        pages: &[PageAttemptUpdate],
    ) -> Result<bool, StoreError> {
        let mut session = self.begin_transaction().await?;

        let applied = track_db_operation(
            "complete_transaction",
            LESSON_ATTEMPTS,
            self.apply_completion(&mut session, completion, pages),
        )
        .await;

        match applied {
            Ok(true) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| StoreError::Transaction(e.to_string()))?;
                Ok(true)
            }
            Ok(false) => {
                // closed meanwhile or not the user's attempt; roll back the page writes
                Self::abort(&mut session, "completion").await;
                Ok(false)
            }
            Err(e) => {
                Self::abort(&mut session, "completion").await;
                Err(StoreError::Transaction(e.to_string()))
            }
        }
    }

    async fn find_open_attempt_by_id(
        &self,
        lesson_attempt_id: i64,
        user_id: &str,
    ) -> Result<Option<LessonAttempt>, StoreError> {
        let document = track_db_operation("find_one", LESSON_ATTEMPTS, async {
            self.lesson_attempts()
                .find_one(doc! {
                    "_id": lesson_attempt_id,
                    "user_id": user_id,
                    "is_complete": false,
                })
                .await
                .map_err(StoreError::from)
        })
        .await?;

        Ok(document.map(LessonAttempt::from))
    }

    async fn find_open_attempt(
        &self,
        scope: &LessonAttemptScope,
    ) -> Result<Option<LessonAttempt>, StoreError> {
        let document = track_db_operation("find_one", LESSON_ATTEMPTS, async {
            self.lesson_attempts()
                .find_one(doc! {
                    "user_id": &scope.user_id,
                    "lesson_id": scope.lesson_id,
                    "plan_id": scope.plan_id,
                    "channel_id": scope.channel_id,
                    "is_complete": false,
                })
                .await
                .map_err(StoreError::from)
        })
        .await?;

        Ok(document.map(LessonAttempt::from))
    }

    async fn list_page_attempts(
        &self,
        lesson_attempt_id: i64,
    ) -> Result<Vec<QuestionPageAttempt>, StoreError> {
        let documents: Vec<PageAttemptDocument> = track_db_operation("find", PAGE_ATTEMPTS, async {
            let cursor = self
                .page_attempts()
                .find(doc! { "lesson_attempt_id": lesson_attempt_id })
                .sort(doc! { "_id": 1 })
                .await?;
            cursor.try_collect::<Vec<_>>().await.map_err(StoreError::from)
        })
        .await?;

        Ok(documents.into_iter().map(QuestionPageAttempt::from).collect())
    }

    async fn list_lesson_attempts(
        &self,
        user_id: &str,
        lesson_id: i64,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<LessonAttempt>, StoreError> {
        let documents: Vec<LessonAttemptDocument> =
            track_db_operation("find", LESSON_ATTEMPTS, async {
                let cursor = self
                    .lesson_attempts()
                    .find(doc! { "user_id": user_id, "lesson_id": lesson_id })
                    .sort(doc! { "end_time": 1, "_id": 1 })
                    .skip(offset)
                    .limit(limit)
                    .await?;
                cursor.try_collect::<Vec<_>>().await.map_err(StoreError::from)
            })
            .await?;

        Ok(documents.into_iter().map(LessonAttempt::from).collect())
    }

    async fn attempt_belongs_to_user(
        &self,
        user_id: &str,
        lesson_attempt_id: i64,
    ) -> Result<bool, StoreError> {
        let count = track_db_operation("count_documents", LESSON_ATTEMPTS, async {
            self.lesson_attempts()
                .count_documents(doc! { "_id": lesson_attempt_id, "user_id": user_id })
                .await
                .map_err(StoreError::from)
        })
        .await?;

        Ok(count > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
