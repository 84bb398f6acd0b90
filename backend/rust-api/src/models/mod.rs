pub mod attempt;
pub mod requests;

pub use attempt::{
    CachedPageAnswer, ContentType, LessonAttempt, LessonAttemptCompletion, NewLessonAttempt,
    NewPageAttempt, PageAttemptUpdate, QuestionPage, QuestionPageAttempt, QuestionType,
};
pub use requests::{
    CompleteLessonBody, CompleteLessonRequest, CompleteLessonResponse, LessonAttemptScope,
    LessonAttemptsParams, LessonAttemptsQuery, LessonAttemptsResponse, PermissionForUser,
    PermissionResponse, SubmitAnswerBody, SubmitAnswerRequest, SubmitAnswerResponse,
    TryLessonBody, TryLessonResponse, UserParams,
};
