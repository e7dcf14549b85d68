use super::{Completion, Subscriber};

/// Subscriber that folds value and completion into one callback.
pub struct Sink<T, F> {
    value: Option<T>,
    callback: Option<F>,
}

impl<T, F> Sink<T, F> {
    pub fn new(callback: F) -> Self {
        Self {
            value: None,
            callback: Some(callback),
        }
    }
}

impl<T, E, F> Subscriber<T, E> for Sink<T, F>
where
    T: Send + 'static,
    F: FnOnce(Result<T, E>) + Send + 'static,
{
    fn receive_value(&mut self, value: T) {
        self.value = Some(value);
    }

    fn receive_completion(&mut self, completion: Completion<E>) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        match completion {
            Completion::Failed(error) => callback(Err(error)),
            // Finished without a value cannot happen for a single-value
            // publisher; the callback is dropped uncalled.
            Completion::Finished => {
                if let Some(value) = self.value.take() {
                    callback(Ok(value));
                }
            }
        }
    }
}
