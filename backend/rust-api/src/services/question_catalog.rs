use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use serde::Deserialize;

use crate::errors::StoreError;
use crate::metrics::track_db_operation;
use crate::models::{ContentType, QuestionPage, QuestionType};

/// Read-only view of lesson content: which pages ask a question and what the right answer is.
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    /// Multiple-choice question pages of a lesson, ordered by page id.
    async fn list_question_pages(&self, lesson_id: i64) -> Result<Vec<QuestionPage>, StoreError>;

    /// The canonical answer of a question page, `None` when the page or its answer is missing.
    async fn canonical_answer(&self, page_id: i64) -> Result<Option<String>, StoreError>;
}

const PAGES: &str = "pages";

#[derive(Debug, Deserialize)]
struct PageDocument {
    #[serde(rename = "_id")]
    id: i64,
    content_type: ContentType,
    question_type: QuestionType,
    #[serde(default)]
    answer: Option<String>,
}

pub struct MongoQuestionCatalog {
    mongo: Database,
}

impl MongoQuestionCatalog {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn pages(&self) -> Collection<PageDocument> {
        self.mongo.collection(PAGES)
    }
}

#[async_trait]
impl QuestionCatalog for MongoQuestionCatalog {
    async fn list_question_pages(&self, lesson_id: i64) -> Result<Vec<QuestionPage>, StoreError> {
        let documents = track_db_operation("find", PAGES, async {
            let cursor = self
                .pages()
                .find(doc! {
                    "lesson_id": lesson_id,
                    "content_type": ContentType::Question.as_str(),
                    "question_type": QuestionType::Multichoice.as_str(),
                })
                .sort(doc! { "_id": 1 })
                .await?;
            cursor.try_collect::<Vec<_>>().await.map_err(StoreError::from)
        })
        .await?;

        Ok(documents
            .into_iter()
            .map(|page| QuestionPage {
                content_type: page.content_type,
                question_type: page.question_type,
                page_id: page.id,
            })
            .collect())
    }

    async fn canonical_answer(&self, page_id: i64) -> Result<Option<String>, StoreError> {
        let document = track_db_operation("find_one", PAGES, async {
            self.pages()
                .find_one(doc! {
                    "_id": page_id,
                    "content_type": ContentType::Question.as_str(),
                    "question_type": QuestionType::Multichoice.as_str(),
                })
                .await
                .map_err(StoreError::from)
        })
        .await?;

        Ok(document
            .and_then(|page| page.answer)
            .filter(|answer| !answer.is_empty()))
    }
}
