use tracing::{span, Level};

/// Spawn-with-handshake helper for long-lived pipeline threads. `init` runs on
/// the new thread; its result is handed back to the caller of `spawn` before
/// `run` takes over, so construction failures surface synchronously.
pub(crate) trait InitializableThread: Sized {
    type InitOptions: Send + 'static;

    /// Represents type returned on successful `init` to the caller of `Self::spawn`
    type SpawnOutput: Send + 'static;
    /// Represents type returned on failed `init` to the caller of `Self::spawn`
    type SpawnError: std::error::Error + Send + 'static;

    const LABEL: &'static str;

    fn init(options: Self::InitOptions) -> Result<(Self, Self::SpawnOutput), Self::SpawnError>;

    fn run(self);

    fn spawn<Id: ToString>(
        thread_instance_id: Id,
        opts: Self::InitOptions,
    ) -> Result<Self::SpawnOutput, Self::SpawnError> {
        let (result_sender, result_receiver) = crossbeam_channel::bounded(0);

        let instance_id = thread_instance_id.to_string();
        let metadata = Self::metadata();
        std::thread::Builder::new()
            .name(format!("{} {}", metadata.thread_name, instance_id))
            .spawn(move || {
                let _span = span!(
                    Level::INFO,
                    "Thread",
                    label = Self::LABEL,
                    thread = metadata.thread_name,
                    instance = instance_id,
                )
                .entered();
                let state = match Self::init(opts) {
                    Ok((state, init_output)) => {
                        result_sender.send(Ok(init_output)).unwrap();
                        state
                    }
                    Err(err) => {
                        result_sender.send(Err(err)).unwrap();
                        return;
                    }
                };
                Self::run(state);
            })
            .unwrap();

        result_receiver.recv().unwrap()
    }

    fn metadata() -> ThreadMetadata {
        ThreadMetadata {
            thread_name: "Initializable thread",
        }
    }
}

pub(crate) struct ThreadMetadata {
    pub thread_name: &'static str,
}
