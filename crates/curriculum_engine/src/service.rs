//! Persistence service abstraction.

use crate::error::{ServiceError, ServiceResult};
use curriculum_model::{Fields, LessonPayload, QuizPayload, SectionPayload, ServerId};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reference to an entity the service just created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRef {
    /// Server-assigned id.
    pub id: ServerId,
}

/// Response envelope returned by every service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Whether the service applied the change.
    pub success: bool,
    /// Created entity, for create calls.
    pub data: Option<CreatedRef>,
    /// Human-readable message, usually set on failure.
    pub message: Option<String>,
}

impl ServiceResponse {
    /// A success without data.
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
        }
    }

    /// A successful create.
    pub fn created(id: impl Into<ServerId>) -> Self {
        Self {
            success: true,
            data: Some(CreatedRef { id: id.into() }),
            message: None,
        }
    }

    /// A rejected call.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// The remote service that persists curriculum changes.
///
/// This trait abstracts the transport, allowing for different
/// implementations (HTTP, gRPC, in-memory for testing, etc.). Transport
/// failures are `Err`; application-level rejections come back as
/// `Ok(ServiceResponse { success: false, .. })`.
pub trait PersistenceService: Send + Sync {
    /// Creates a section.
    fn create_section(
        &self,
        course_id: &str,
        payload: &SectionPayload,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Updates a section.
    fn update_section(
        &self,
        course_id: &str,
        section_id: &ServerId,
        payload: &SectionPayload,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Deletes a section and everything in it.
    fn delete_section(
        &self,
        course_id: &str,
        section_id: &ServerId,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Creates a lesson in a section.
    fn create_lesson(
        &self,
        course_id: &str,
        section_id: &ServerId,
        payload: &LessonPayload,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Updates a lesson.
    fn update_lesson(
        &self,
        course_id: &str,
        section_id: &ServerId,
        lesson_id: &ServerId,
        payload: &LessonPayload,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Deletes a lesson.
    fn delete_lesson(
        &self,
        course_id: &str,
        section_id: &ServerId,
        lesson_id: &ServerId,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Creates the quiz of a section.
    fn create_quiz(
        &self,
        course_id: &str,
        section_id: &ServerId,
        payload: &QuizPayload,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Updates a quiz.
    fn update_quiz(
        &self,
        course_id: &str,
        section_id: &ServerId,
        quiz_id: &ServerId,
        payload: &QuizPayload,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Deletes a quiz.
    fn delete_quiz(
        &self,
        course_id: &str,
        section_id: &ServerId,
        quiz_id: &ServerId,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;

    /// Updates flat course metadata.
    fn update_course(
        &self,
        course_id: &str,
        payload: &Fields,
    ) -> impl Future<Output = ServiceResult<ServiceResponse>> + Send;
}

/// Service endpoint, used to script and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `create_section`.
    CreateSection,
    /// `update_section`.
    UpdateSection,
    /// `delete_section`.
    DeleteSection,
    /// `create_lesson`.
    CreateLesson,
    /// `update_lesson`.
    UpdateLesson,
    /// `delete_lesson`.
    DeleteLesson,
    /// `create_quiz`.
    CreateQuiz,
    /// `update_quiz`.
    UpdateQuiz,
    /// `delete_quiz`.
    DeleteQuiz,
    /// `update_course`.
    UpdateCourse,
}

/// A recorded service call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    /// `create_section`.
    CreateSection {
        /// Course id.
        course_id: String,
        /// Payload sent.
        payload: SectionPayload,
    },
    /// `update_section`.
    UpdateSection {
        /// Course id.
        course_id: String,
        /// Target section.
        section_id: ServerId,
        /// Payload sent.
        payload: SectionPayload,
    },
    /// `delete_section`.
    DeleteSection {
        /// Course id.
        course_id: String,
        /// Target section.
        section_id: ServerId,
    },
    /// `create_lesson`.
    CreateLesson {
        /// Course id.
        course_id: String,
        /// Owning section.
        section_id: ServerId,
        /// Payload sent.
        payload: LessonPayload,
    },
    /// `update_lesson`.
    UpdateLesson {
        /// Course id.
        course_id: String,
        /// Owning section.
        section_id: ServerId,
        /// Target lesson.
        lesson_id: ServerId,
        /// Payload sent.
        payload: LessonPayload,
    },
    /// `delete_lesson`.
    DeleteLesson {
        /// Course id.
        course_id: String,
        /// Owning section.
        section_id: ServerId,
        /// Target lesson.
        lesson_id: ServerId,
    },
    /// `create_quiz`.
    CreateQuiz {
        /// Course id.
        course_id: String,
        /// Owning section.
        section_id: ServerId,
        /// Payload sent.
        payload: QuizPayload,
    },
    /// `update_quiz`.
    UpdateQuiz {
        /// Course id.
        course_id: String,
        /// Owning section.
        section_id: ServerId,
        /// Target quiz.
        quiz_id: ServerId,
        /// Payload sent.
        payload: QuizPayload,
    },
    /// `delete_quiz`.
    DeleteQuiz {
        /// Course id.
        course_id: String,
        /// Owning section.
        section_id: ServerId,
        /// Target quiz.
        quiz_id: ServerId,
    },
    /// `update_course`.
    UpdateCourse {
        /// Course id.
        course_id: String,
        /// Payload sent.
        payload: Fields,
    },
}

impl ServiceCall {
    /// Returns the endpoint this call hit.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            ServiceCall::CreateSection { .. } => Endpoint::CreateSection,
            ServiceCall::UpdateSection { .. } => Endpoint::UpdateSection,
            ServiceCall::DeleteSection { .. } => Endpoint::DeleteSection,
            ServiceCall::CreateLesson { .. } => Endpoint::CreateLesson,
            ServiceCall::UpdateLesson { .. } => Endpoint::UpdateLesson,
            ServiceCall::DeleteLesson { .. } => Endpoint::DeleteLesson,
            ServiceCall::CreateQuiz { .. } => Endpoint::CreateQuiz,
            ServiceCall::UpdateQuiz { .. } => Endpoint::UpdateQuiz,
            ServiceCall::DeleteQuiz { .. } => Endpoint::DeleteQuiz,
            ServiceCall::UpdateCourse { .. } => Endpoint::UpdateCourse,
        }
    }

    /// Returns the owning section id for section, lesson and quiz calls.
    pub fn section_id(&self) -> Option<&ServerId> {
        match self {
            ServiceCall::CreateSection { .. } | ServiceCall::UpdateCourse { .. } => None,
            ServiceCall::UpdateSection { section_id, .. }
            | ServiceCall::DeleteSection { section_id, .. }
            | ServiceCall::CreateLesson { section_id, .. }
            | ServiceCall::UpdateLesson { section_id, .. }
            | ServiceCall::DeleteLesson { section_id, .. }
            | ServiceCall::CreateQuiz { section_id, .. }
            | ServiceCall::UpdateQuiz { section_id, .. }
            | ServiceCall::DeleteQuiz { section_id, .. } => Some(section_id),
        }
    }
}

/// How a scripted call fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Answer `success: false` with this message.
    Reject(String),
    /// Fail the transport with this error.
    Error(ServiceError),
}

#[derive(Debug)]
struct FailureRule {
    endpoint: Endpoint,
    failure: Failure,
    remaining: Option<u32>,
}

type AnswerHook = Arc<dyn Fn(Endpoint) + Send + Sync>;

/// An in-memory persistence service for testing.
///
/// Records every call before answering, assigns sequential server ids on
/// create, and can be scripted to fail or to answer slowly.
#[derive(Default)]
pub struct MemoryPersistence {
    calls: Mutex<Vec<ServiceCall>>,
    failures: Mutex<Vec<FailureRule>>,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    on_answer: Mutex<Option<AnswerHook>>,
}

impl fmt::Debug for MemoryPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPersistence")
            .field("calls", &self.calls.lock().len())
            .field("failures", &self.failures.lock().len())
            .field("latency", &*self.latency.lock())
            .finish_non_exhaustive()
    }
}

impl MemoryPersistence {
    /// Creates a new in-memory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call to `endpoint` until [`recover`](Self::recover).
    pub fn fail(&self, endpoint: Endpoint, failure: Failure) {
        self.failures.lock().push(FailureRule {
            endpoint,
            failure,
            remaining: None,
        });
    }

    /// Fails the next `times` calls to `endpoint`.
    pub fn fail_times(&self, endpoint: Endpoint, times: u32, failure: Failure) {
        self.failures.lock().push(FailureRule {
            endpoint,
            failure,
            remaining: Some(times),
        });
    }

    /// Removes every failure scripted for `endpoint`.
    pub fn recover(&self, endpoint: Endpoint) {
        self.failures.lock().retain(|rule| rule.endpoint != endpoint);
    }

    /// Removes every scripted failure.
    pub fn recover_all(&self) {
        self.failures.lock().clear();
    }

    /// Delays every answer.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Runs `hook` with the endpoint each time a call is answered, just
    /// before the answer is returned.
    pub fn on_answer<F>(&self, hook: F)
    where
        F: Fn(Endpoint) + Send + Sync + 'static,
    {
        *self.on_answer.lock() = Some(Arc::new(hook));
    }

    /// Returns every recorded call in dispatch order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Returns the recorded calls to one endpoint.
    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<ServiceCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.endpoint() == endpoint)
            .cloned()
            .collect()
    }

    /// Returns the number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forgets recorded calls.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn take_failure(&self, endpoint: Endpoint) -> Option<Failure> {
        let mut failures = self.failures.lock();
        let index = failures
            .iter()
            .position(|rule| rule.endpoint == endpoint && rule.remaining != Some(0))?;
        let rule = &mut failures[index];
        let failure = rule.failure.clone();
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                failures.remove(index);
            }
        }
        Some(failure)
    }

    fn assign_id(&self, prefix: &str) -> ServerId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        ServerId::new(format!("{prefix}-{n}"))
    }

    async fn answer(
        &self,
        call: ServiceCall,
        created: Option<&'static str>,
    ) -> ServiceResult<ServiceResponse> {
        let endpoint = call.endpoint();
        self.calls.lock().push(call);

        let latency = *self.latency.lock();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        let answer = match self.take_failure(endpoint) {
            Some(Failure::Reject(message)) => Ok(ServiceResponse::error(message)),
            Some(Failure::Error(err)) => Err(err),
            None => Ok(match created {
                Some(prefix) => ServiceResponse::created(self.assign_id(prefix)),
                None => ServiceResponse::ok(),
            }),
        };

        let hook = self.on_answer.lock().clone();
        if let Some(hook) = hook {
            hook(endpoint);
        }
        answer
    }
}

impl PersistenceService for MemoryPersistence {
    async fn create_section(
        &self,
        course_id: &str,
        payload: &SectionPayload,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::CreateSection {
            course_id: course_id.to_string(),
            payload: payload.clone(),
        };
        self.answer(call, Some("section")).await
    }

    async fn update_section(
        &self,
        course_id: &str,
        section_id: &ServerId,
        payload: &SectionPayload,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::UpdateSection {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            payload: payload.clone(),
        };
        self.answer(call, None).await
    }

    async fn delete_section(
        &self,
        course_id: &str,
        section_id: &ServerId,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::DeleteSection {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
        };
        self.answer(call, None).await
    }

    async fn create_lesson(
        &self,
        course_id: &str,
        section_id: &ServerId,
        payload: &LessonPayload,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::CreateLesson {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            payload: payload.clone(),
        };
        self.answer(call, Some("lesson")).await
    }

    async fn update_lesson(
        &self,
        course_id: &str,
        section_id: &ServerId,
        lesson_id: &ServerId,
        payload: &LessonPayload,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::UpdateLesson {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            lesson_id: lesson_id.clone(),
            payload: payload.clone(),
        };
        self.answer(call, None).await
    }

    async fn delete_lesson(
        &self,
        course_id: &str,
        section_id: &ServerId,
        lesson_id: &ServerId,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::DeleteLesson {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            lesson_id: lesson_id.clone(),
        };
        self.answer(call, None).await
    }

    async fn create_quiz(
        &self,
        course_id: &str,
        section_id: &ServerId,
        payload: &QuizPayload,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::CreateQuiz {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            payload: payload.clone(),
        };
        self.answer(call, Some("quiz")).await
    }

    async fn update_quiz(
        &self,
        course_id: &str,
        section_id: &ServerId,
        quiz_id: &ServerId,
        payload: &QuizPayload,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::UpdateQuiz {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            quiz_id: quiz_id.clone(),
            payload: payload.clone(),
        };
        self.answer(call, None).await
    }

    async fn delete_quiz(
        &self,
        course_id: &str,
        section_id: &ServerId,
        quiz_id: &ServerId,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::DeleteQuiz {
            course_id: course_id.to_string(),
            section_id: section_id.clone(),
            quiz_id: quiz_id.clone(),
        };
        self.answer(call, None).await
    }

    async fn update_course(
        &self,
        course_id: &str,
        payload: &Fields,
    ) -> ServiceResult<ServiceResponse> {
        let call = ServiceCall::UpdateCourse {
            course_id: course_id.to_string(),
            payload: payload.clone(),
        };
        self.answer(call, None).await
    }
}
