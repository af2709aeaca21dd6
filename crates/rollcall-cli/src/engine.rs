use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use rollcall_core::{ConfirmationPolicy, Embedding, EmbeddingMatcher, Gate};
use rollcall_store::{AttendanceCoordinator, RosterService, Store, StoreError, Student};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no class selected")]
    NoActiveClass,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Recognition and marking parameters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub similarity_threshold: f32,
    pub required_confirmations: u32,
    pub cooldown: Duration,
    pub auto_mark: bool,
}

/// What happened to one query embedding (or one manual mark).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    NoMatch,
    /// Matched in manual mode; nothing is marked.
    Identified {
        student_id: String,
        roll: String,
        name: String,
        confidence: f32,
    },
    Confirming {
        student_id: String,
        confidence: f32,
        count: u32,
        required: u32,
    },
    RecentlyMarked {
        student_id: String,
        name: String,
    },
    Marked {
        student_id: String,
        roll: String,
        name: String,
    },
    AlreadyMarked {
        student_id: String,
        roll: String,
        name: String,
    },
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    SwitchClass {
        class_id: String,
        reply: oneshot::Sender<usize>,
    },
    Recognize {
        embedding: Embedding,
        reply: oneshot::Sender<Result<RecognitionOutcome, EngineError>>,
    },
    MarkManually {
        student_id: String,
        reply: oneshot::Sender<Result<RecognitionOutcome, EngineError>>,
    },
    SetAutoMark {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Forget {
        student_id: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Make `class_id` active: reload its embeddings and reset the gate.
    /// Returns the number of students with samples.
    pub async fn switch_class(&self, class_id: &str) -> Result<usize, EngineError> {
        let class_id = class_id.to_string();
        self.request(|reply| EngineRequest::SwitchClass { class_id, reply })
            .await
    }

    /// Match one query embedding and, once confirmed, mark attendance.
    pub async fn recognize(&self, embedding: Embedding) -> Result<RecognitionOutcome, EngineError> {
        self.request(|reply| EngineRequest::Recognize { embedding, reply })
            .await?
    }

    /// Mark `student_id` in the active class, bypassing the gate.
    pub async fn mark_manually(&self, student_id: &str) -> Result<RecognitionOutcome, EngineError> {
        let student_id = student_id.to_string();
        self.request(|reply| EngineRequest::MarkManually { student_id, reply })
            .await?
    }

    /// Toggle automatic marking. Clears all pending counters.
    pub async fn set_auto_mark(&self, enabled: bool) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::SetAutoMark { enabled, reply })
            .await
    }

    /// Drop a student from the in-memory index.
    pub async fn forget(&self, student_id: &str) -> Result<bool, EngineError> {
        let student_id = student_id.to_string();
        self.request(|reply| EngineRequest::Forget { student_id, reply })
            .await
    }
}

/// Engine state. Owned by the engine thread alone, so the embedding index
/// is never read while a class switch is rebuilding it.
struct Engine {
    store: Store,
    roster: RosterService,
    coordinator: AttendanceCoordinator,
    matcher: EmbeddingMatcher,
    policy: ConfirmationPolicy,
    threshold: f32,
    auto_mark: bool,
    class_id: Option<String>,
}

impl Engine {
    fn new(store: Store, settings: &EngineSettings) -> Self {
        Self {
            roster: store.roster(),
            coordinator: store.coordinator(),
            store,
            matcher: EmbeddingMatcher::new(),
            policy: ConfirmationPolicy::new(settings.required_confirmations, settings.cooldown),
            threshold: settings.similarity_threshold,
            auto_mark: settings.auto_mark,
            class_id: None,
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::SwitchClass { class_id, reply } => {
                let _ = reply.send(self.switch_class(class_id));
            }
            EngineRequest::Recognize { embedding, reply } => {
                let _ = reply.send(self.recognize(&embedding, Instant::now()));
            }
            EngineRequest::MarkManually { student_id, reply } => {
                let _ = reply.send(self.mark_manually(&student_id));
            }
            EngineRequest::SetAutoMark { enabled, reply } => {
                self.auto_mark = enabled;
                self.policy.reset_counters();
                tracing::info!(enabled, "auto-mark toggled");
                let _ = reply.send(());
            }
            EngineRequest::Forget { student_id, reply } => {
                let _ = reply.send(self.matcher.remove(&student_id));
            }
        }
    }

    fn switch_class(&mut self, class_id: String) -> usize {
        self.matcher.clear();
        self.policy.reset();

        let student_ids = self.store.classes.student_ids(&class_id);
        if student_ids.is_empty() {
            tracing::warn!(class_id = %class_id, "class has no enrolled students");
        }
        for (student_id, samples) in self.store.embeddings.load_for(&student_ids) {
            self.matcher.enroll(&student_id, samples);
        }

        let loaded = self.matcher.len();
        tracing::info!(
            class_id = %class_id,
            students = loaded,
            samples = self.matcher.sample_count(),
            "class loaded"
        );
        self.class_id = Some(class_id);
        loaded
    }

    fn recognize(
        &mut self,
        embedding: &Embedding,
        now: Instant,
    ) -> Result<RecognitionOutcome, EngineError> {
        let Some(found) = self.matcher.recognize(embedding, self.threshold) else {
            return Ok(RecognitionOutcome::NoMatch);
        };
        let class_id = self.class_id.clone().ok_or(EngineError::NoActiveClass)?;

        if !self.auto_mark {
            let student = self.roster.resolve(&found.student_id, &class_id);
            return Ok(RecognitionOutcome::Identified {
                student_id: student.id,
                roll: student.roll,
                name: student.name,
                confidence: found.confidence,
            });
        }

        match self.policy.observe(&found.student_id, now) {
            Gate::Counting { count, required } => Ok(RecognitionOutcome::Confirming {
                student_id: found.student_id,
                confidence: found.confidence,
                count,
                required,
            }),
            Gate::Cooldown { .. } => {
                let student = self.roster.resolve(&found.student_id, &class_id);
                Ok(RecognitionOutcome::RecentlyMarked {
                    student_id: student.id,
                    name: student.name,
                })
            }
            Gate::Confirmed => {
                let student = self.roster.resolve(&found.student_id, &class_id);
                tracing::info!(
                    student_id = %student.id,
                    confidence = found.confidence,
                    "recognition confirmed"
                );
                self.mark(&class_id, student)
            }
        }
    }

    fn mark_manually(&self, student_id: &str) -> Result<RecognitionOutcome, EngineError> {
        let class_id = self.class_id.clone().ok_or(EngineError::NoActiveClass)?;
        let student = self.roster.resolve(student_id, &class_id);
        self.mark(&class_id, student)
    }

    fn mark(&self, class_id: &str, student: Student) -> Result<RecognitionOutcome, EngineError> {
        let marked = self.coordinator.mark_if_not_marked(
            class_id,
            &student.id,
            &student.name,
            &student.roll,
        )?;
        let Student { id, roll, name, .. } = student;
        Ok(if marked {
            RecognitionOutcome::Marked { student_id: id, roll, name }
        } else {
            RecognitionOutcome::AlreadyMarked { student_id: id, roll, name }
        })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the embedding index and the confirmation gate and
/// serves requests one at a time until every handle is dropped.
pub fn spawn_engine(store: Store, settings: EngineSettings) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut engine = Engine::new(store, &settings);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(
                threshold = settings.similarity_threshold,
                required = settings.required_confirmations,
                cooldown_secs = settings.cooldown.as_secs(),
                auto_mark = settings.auto_mark,
                "engine thread started"
            );
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(auto_mark: bool) -> EngineSettings {
        EngineSettings {
            similarity_threshold: 0.75,
            required_confirmations: 3,
            cooldown: Duration::from_secs(10),
            auto_mark,
        }
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    /// Store with one class enrolling Ada (x axis) and Bo (y axis).
    fn setup() -> (tempfile::TempDir, Store, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let class = store.classes.create("Chemistry", "").unwrap();
        let roster = store.roster();
        roster
            .enroll(&class.id, "1", "Ada", &[emb(&[1.0, 0.0, 0.0])], None)
            .unwrap();
        roster
            .enroll(&class.id, "2", "Bo", &[emb(&[0.0, 1.0, 0.0])], None)
            .unwrap();
        (dir, store, class.id)
    }

    #[test]
    fn test_gate_then_cooldown() {
        let (_dir, store, class_id) = setup();
        let mut engine = Engine::new(store.clone(), &settings(true));
        assert_eq!(engine.switch_class(class_id.clone()), 2);

        let t0 = Instant::now();
        let query = emb(&[1.0, 0.0, 0.0]);
        for expected in 1..=2 {
            match engine.recognize(&query, t0).unwrap() {
                RecognitionOutcome::Confirming { count, required, confidence, .. } => {
                    assert_eq!((count, required), (expected, 3));
                    assert!((confidence - 1.0).abs() < 1e-6);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            engine.recognize(&query, t0).unwrap(),
            RecognitionOutcome::Marked {
                student_id: "1_Ada".into(),
                roll: "1".into(),
                name: "Ada".into()
            }
        );
        assert!(matches!(
            engine.recognize(&query, t0 + Duration::from_secs(1)).unwrap(),
            RecognitionOutcome::RecentlyMarked { .. }
        ));

        let records = store.coordinator().records_for(&class_id, rollcall_store::coordinator::today());
        assert_eq!(records.len(), 1);

        // after the cooldown the gate counts again, and the mark is a duplicate
        let later = t0 + Duration::from_secs(11);
        engine.recognize(&query, later).unwrap();
        engine.recognize(&query, later).unwrap();
        assert!(matches!(
            engine.recognize(&query, later).unwrap(),
            RecognitionOutcome::AlreadyMarked { .. }
        ));
    }

    #[test]
    fn test_unknown_face_and_empty_class() {
        let (_dir, store, class_id) = setup();
        let mut engine = Engine::new(store.clone(), &settings(true));
        // nothing loaded yet
        assert_eq!(
            engine.recognize(&emb(&[1.0, 0.0, 0.0]), Instant::now()).unwrap(),
            RecognitionOutcome::NoMatch
        );

        engine.switch_class(class_id);
        let far = emb(&[0.0, 0.0, 1.0]);
        assert_eq!(engine.recognize(&far, Instant::now()).unwrap(), RecognitionOutcome::NoMatch);

        assert_eq!(engine.switch_class("ghost".into()), 0);
        assert!(engine.matcher.is_empty());
    }

    #[test]
    fn test_manual_mode_only_identifies() {
        let (_dir, store, class_id) = setup();
        let mut engine = Engine::new(store.clone(), &settings(false));
        engine.switch_class(class_id.clone());

        for _ in 0..5 {
            assert!(matches!(
                engine.recognize(&emb(&[0.0, 1.0, 0.0]), Instant::now()).unwrap(),
                RecognitionOutcome::Identified { ref name, .. } if name == "Bo"
            ));
        }
        assert!(store.coordinator().records_for(&class_id, rollcall_store::coordinator::today()).is_empty());
    }

    #[test]
    fn test_mark_manually_requires_class() {
        let (_dir, store, _class_id) = setup();
        let engine = Engine::new(store, &settings(true));
        assert!(matches!(engine.mark_manually("1_Ada"), Err(EngineError::NoActiveClass)));
    }

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let (_dir, store, class_id) = setup();
        let handle = spawn_engine(store.clone(), settings(true)).unwrap();

        assert_eq!(handle.switch_class(&class_id).await.unwrap(), 2);
        assert!(matches!(
            handle.mark_manually("2_Bo").await.unwrap(),
            RecognitionOutcome::Marked { .. }
        ));
        assert!(matches!(
            handle.mark_manually("2_Bo").await.unwrap(),
            RecognitionOutcome::AlreadyMarked { .. }
        ));

        handle.set_auto_mark(false).await.unwrap();
        assert!(matches!(
            handle.recognize(emb(&[1.0, 0.0, 0.0])).await.unwrap(),
            RecognitionOutcome::Identified { .. }
        ));

        assert!(handle.forget("1_Ada").await.unwrap());
        assert_eq!(
            handle.recognize(emb(&[1.0, 0.0, 0.0])).await.unwrap(),
            RecognitionOutcome::NoMatch
        );
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(RecognitionOutcome::Confirming {
            student_id: "1_Ada".into(),
            confidence: 0.5,
            count: 1,
            required: 3,
        })
        .unwrap();
        assert_eq!(json["outcome"], "confirming");
        assert_eq!(json["count"], 1);
        assert_eq!(
            serde_json::to_value(RecognitionOutcome::NoMatch).unwrap()["outcome"],
            "no_match"
        );
    }
}
