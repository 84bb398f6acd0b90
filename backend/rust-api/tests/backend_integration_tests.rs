//! Runs against live MongoDB (replica set) and Redis from `.env.test`:
//! `cargo test --test backend_integration_tests -- --ignored`

use chrono::Utc;
use mongodb::bson::doc;
use uuid::Uuid;

use lesson_attempts_api::{
    config::Config,
    models::{
        CachedPageAnswer, ContentType, LessonAttemptCompletion, LessonAttemptScope,
        NewLessonAttempt, NewPageAttempt, PageAttemptUpdate, QuestionType,
    },
    services::{
        answer_cache::{AnswerCache, RedisAnswerCache},
        attempt_store::{AttemptStore, MongoAttemptStore},
        question_catalog::{MongoQuestionCatalog, QuestionCatalog},
    },
    StoreError,
};

async fn mongo() -> mongodb::Database {
    dotenvy::from_filename(".env.test").ok();
    let config = Config::load().expect("Failed to load test configuration");
    let client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");
    client.database(&config.mongo_database)
}

fn unique_user() -> String {
    format!("learner-{}", Uuid::new_v4())
}

fn new_attempt(user_id: &str) -> NewLessonAttempt {
    NewLessonAttempt {
        user_id: user_id.to_string(),
        lesson_id: 3,
        plan_id: 2,
        channel_id: 1,
        start_time: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires MongoDB replica set"]
async fn test_open_attempt_unique_per_scope() {
    let store = MongoAttemptStore::new(mongo().await);
    store.ensure_indexes().await.unwrap();
    let user_id = unique_user();

    let id = store.create_lesson_attempt(&new_attempt(&user_id)).await.unwrap();
    let err = store
        .create_lesson_attempt(&new_attempt(&user_id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    let completion = LessonAttemptCompletion {
        lesson_attempt_id: id,
        user_id: user_id.clone(),
        end_time: Utc::now(),
        is_successful: true,
        percentage_score: 100,
    };
    assert!(store.complete_lesson_attempt(&completion, &[]).await.unwrap());
    assert!(store.find_open_attempt_by_id(id, &user_id).await.unwrap().is_none());

    store.create_lesson_attempt(&new_attempt(&user_id)).await.unwrap();
    let listed = store.list_lesson_attempts(&user_id, 3, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].end_time.is_none());
}

#[tokio::test]
#[ignore = "requires MongoDB replica set"]
async fn test_page_attempts_round_trip() {
    let store = MongoAttemptStore::new(mongo().await);
    store.ensure_indexes().await.unwrap();
    let user_id = unique_user();
    let lesson_attempt_id = store.create_lesson_attempt(&new_attempt(&user_id)).await.unwrap();

    let pages: Vec<NewPageAttempt> = [40, 41]
        .into_iter()
        .map(|page_id| NewPageAttempt {
            lesson_attempt_id,
            page_id,
            content_type: ContentType::Question,
            question_type: QuestionType::Multichoice,
            modified: Utc::now(),
        })
        .collect();
    let created = store.create_page_attempts(&pages).await.unwrap();
    assert_eq!(created.len(), 2);

    let scope = LessonAttemptScope {
        user_id: user_id.clone(),
        lesson_id: 3,
        plan_id: 2,
        channel_id: 1,
    };
    let open = store.find_open_attempt(&scope).await.unwrap().unwrap();
    assert_eq!(open.id, lesson_attempt_id);
    assert!(store
        .find_open_attempt_by_id(lesson_attempt_id, &user_id)
        .await
        .unwrap()
        .is_some());
    assert!(store.attempt_belongs_to_user(&user_id, lesson_attempt_id).await.unwrap());

    let answer = |user_answer: &str, is_correct| PageAttemptUpdate {
        page_attempt_id: created[1].id,
        lesson_attempt_id,
        user_answer: user_answer.to_string(),
        is_correct,
        modified: Utc::now(),
    };
    let completion = LessonAttemptCompletion {
        lesson_attempt_id,
        user_id: user_id.clone(),
        end_time: Utc::now(),
        is_successful: false,
        percentage_score: 50,
    };

    let completed = store
        .complete_lesson_attempt(&completion, &[answer("OPTION_B", true)])
        .await
        .unwrap();
    assert!(completed);

    // the second completion aborts, so its page write is rolled back
    let again = store
        .complete_lesson_attempt(&completion, &[answer("OPTION_C", false)])
        .await
        .unwrap();
    assert!(!again);

    let stored = store.list_page_attempts(lesson_attempt_id).await.unwrap();
    assert_eq!(stored[1].user_answer, "OPTION_B");
    assert!(stored[1].is_correct);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set"]
async fn test_catalog_reads_question_pages() {
    let db = mongo().await;
    let lesson_id = Utc::now().timestamp_micros();
    db.collection::<mongodb::bson::Document>("pages")
        .insert_many([
            doc! { "_id": lesson_id, "lesson_id": lesson_id, "content_type": "question",
                   "question_type": "multichoice", "answer": "OPTION_D" },
            doc! { "_id": lesson_id + 1, "lesson_id": lesson_id, "content_type": "text",
                   "question_type": "none" },
        ])
        .await
        .unwrap();

    let catalog = MongoQuestionCatalog::new(db);
    let pages = catalog.list_question_pages(lesson_id).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].page_id, lesson_id);
    assert_eq!(
        catalog.canonical_answer(lesson_id).await.unwrap().as_deref(),
        Some("OPTION_D")
    );
    assert!(catalog.canonical_answer(lesson_id + 1).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_answer_cache() {
    dotenvy::from_filename(".env.test").ok();
    let config = Config::load().expect("Failed to load test configuration");
    let client = redis::Client::open(config.redis_uri.clone()).unwrap();
    let manager = redis::aio::ConnectionManager::new(client).await.unwrap();
    let cache = RedisAnswerCache::new(manager, 60);
    let lesson_attempt_id = Utc::now().timestamp_micros();

    cache
        .write(lesson_attempt_id, 2, &CachedPageAnswer::unanswered(41))
        .await
        .unwrap();
    cache
        .write(
            lesson_attempt_id,
            1,
            &CachedPageAnswer {
                page_id: 40,
                user_answer: "OPTION_A".to_string(),
                is_correct: true,
            },
        )
        .await
        .unwrap();

    let cached = cache.read_all(lesson_attempt_id).await.unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].id, 1);
    assert!(cached[0].is_correct);
    assert_eq!(
        cache.read(lesson_attempt_id, 2).await.unwrap().map(|a| a.page_id),
        Some(41)
    );
    assert!(cache.read(lesson_attempt_id, 3).await.unwrap().is_none());

    cache
        .write_all(
            lesson_attempt_id,
            &[
                (3, CachedPageAnswer::unanswered(42)),
                (4, CachedPageAnswer::unanswered(43)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(cache.read_all(lesson_attempt_id).await.unwrap().len(), 4);

    cache.clear(lesson_attempt_id).await.unwrap();
    assert!(cache.read_all(lesson_attempt_id).await.unwrap().is_empty());
}
