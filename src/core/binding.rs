use crate::{
    core::{bitmap::Bitmap, coordinator::Coordinator},
    fetch::fetcher::Fetcher,
};
use log::{debug, warn};
use parking_lot::RwLock;

#[derive(Default)]
struct BindingState {
    source: Option<String>,
    is_loading: bool,
    image: Option<Bitmap>,
    fallback: Option<Bitmap>,
}

/// Binds a changeable image source to the bitmap currently shown for it.
///
/// Whoever owns the UI element calls [`ImageBinding::set_source`] when the
/// source changes and reads [`ImageBinding::image`] / [`ImageBinding::is_loading`]
/// back. A load that finishes after the source has moved on is discarded.
pub struct ImageBinding<F> {
    coordinator: Coordinator<F>,
    state: RwLock<BindingState>,
}

impl<F: Fetcher> ImageBinding<F> {
    pub fn new(coordinator: Coordinator<F>) -> Self {
        Self {
            coordinator,
            state: RwLock::new(BindingState::default()),
        }
    }

    pub fn with_fallback(coordinator: Coordinator<F>, fallback: Bitmap) -> Self {
        let binding = Self::new(coordinator);
        binding.set_fallback(Some(fallback));
        binding
    }

    pub async fn set_source(&self, source: Option<&str>) {
        {
            let mut state = self.state.write();
            if state.source.as_deref() == source {
                return;
            }
            state.source = source.map(str::to_string);
            state.is_loading = true;
        }

        let image = match source.filter(|s| !s.trim().is_empty()) {
            Some(id) => match self.coordinator.request(id).await {
                Ok(bitmap) => Some(bitmap),
                Err(e) => {
                    warn!("Image resolution for {} failed: {}", id, e);
                    None
                }
            },
            None => {
                let mut state = self.state.write();
                if let Some(fallback) = state.fallback.clone() {
                    state.image = Some(fallback);
                    state.is_loading = false;
                    return;
                }
                None
            }
        };

        let mut state = self.state.write();
        if state.source.as_deref() != source {
            debug!(
                "Discarding result for {:?}, source is now {:?}",
                source, state.source
            );
            return;
        }
        state.image = image;
        state.is_loading = false;
    }

    pub fn source(&self) -> Option<String> {
        self.state.read().source.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    pub fn image(&self) -> Option<Bitmap> {
        self.state.read().image.clone()
    }

    pub fn fallback(&self) -> Option<Bitmap> {
        self.state.read().fallback.clone()
    }

    pub fn set_fallback(&self, fallback: Option<Bitmap>) {
        self.state.write().fallback = fallback;
    }

    pub fn coordinator(&self) -> &Coordinator<F> {
        &self.coordinator
    }
}
