use medialib_core::constants::DEFAULT_QUEUE;
use medialib_core::models::JobPayload;
use medialib_core::QueuePolicy;
use uuid::Uuid;

/// One transformer run for a file, plus where it should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub file_id: Uuid,
    /// Transformation name configured for the file's type.
    pub name: String,
    pub queue: QueuePolicy,
}

impl Invocation {
    pub fn new(file_id: Uuid, name: impl Into<String>, queue: QueuePolicy) -> Self {
        Self {
            file_id,
            name: name.into(),
            queue,
        }
    }

    /// Same invocation, forced to run in the caller.
    pub fn inline(mut self) -> Self {
        self.queue = QueuePolicy::Inline;
        self
    }

    pub fn is_inline(&self) -> bool {
        self.queue.is_inline()
    }

    /// Queue a deferred run is enqueued on.
    pub fn queue_name(&self) -> &str {
        self.queue.queue_name().unwrap_or(DEFAULT_QUEUE)
    }

    pub fn payload(&self) -> JobPayload {
        JobPayload::Transform {
            file_id: self.file_id,
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_follow_policy() {
        let id = Uuid::new_v4();
        assert_eq!(Invocation::new(id, "thumb", QueuePolicy::Default).queue_name(), "default");
        assert_eq!(
            Invocation::new(id, "default", QueuePolicy::Named("medialib_video".into())).queue_name(),
            "medialib_video"
        );

        let forced = Invocation::new(id, "default", QueuePolicy::Named("medialib_video".into())).inline();
        assert!(forced.is_inline());
        assert_eq!(
            forced.payload(),
            JobPayload::Transform {
                file_id: id,
                name: "default".into()
            }
        );
    }
}
