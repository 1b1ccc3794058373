use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};

/// One page of a paged REST listing.
#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub values: Vec<T>,
    #[serde(default = "default_last_page")]
    pub is_last_page: bool,
    pub next_page_start: Option<u64>,
}

fn default_last_page() -> bool {
    true
}

impl<T> Page<T> {
    pub fn last(values: Vec<T>) -> Self {
        Self {
            values,
            is_last_page: true,
            next_page_start: None,
        }
    }

    /// Start offset of the following page, if there is one.
    pub fn next_start(&self) -> Option<u64> {
        if self.is_last_page {
            None
        } else {
            self.next_page_start
        }
    }
}

pub type PageFuture<T> = BoxFuture<'static, anyhow::Result<Page<T>>>;

struct Pager<T, F> {
    fetch_page: F,
    next_start: Option<u64>,
    buffer: VecDeque<T>,
    valve: Arc<AtomicBool>,
}

/// Lazily fetches pages of a remote listing and yields their items one by one.
///
/// [`PageStream::stop_stream`] prevents any further page from being requested. A page that
/// is already being fetched is not aborted, and items of already fetched pages are still
/// yielded if the stream keeps being polled.
pub struct PageStream<T> {
    inner: BoxStream<'static, anyhow::Result<T>>,
    valve: Arc<AtomicBool>,
}

impl<T: Send + 'static> PageStream<T> {
    /// `fetch_page` receives the start offset of the requested page.
    pub fn new<F>(fetch_page: F) -> Self
    where
        F: FnMut(u64) -> PageFuture<T> + Send + 'static,
    {
        let valve = Arc::new(AtomicBool::new(true));
        let pager = Pager {
            fetch_page,
            next_start: Some(0),
            buffer: VecDeque::new(),
            valve: valve.clone(),
        };

        let inner = stream::unfold(pager, |mut pager| async move {
            loop {
                if let Some(item) = pager.buffer.pop_front() {
                    return Some((Ok(item), pager));
                }
                let start = pager.next_start.take()?;
                if !pager.valve.load(Ordering::Acquire) {
                    tracing::trace!("Page stream stopped before fetching page at {start}");
                    return None;
                }
                tracing::trace!("Fetching page at {start}");
                match (pager.fetch_page)(start).await {
                    Ok(page) => {
                        pager.next_start = page.next_start();
                        pager.buffer.extend(page.values);
                    }
                    // `next_start` was taken, so the stream ends after the error.
                    Err(error) => return Some((Err(error), pager)),
                }
            }
        })
        .boxed();

        Self { inner, valve }
    }

    /// Stream over a fixed set of pages, mostly useful in tests.
    pub fn from_pages(pages: Vec<Vec<T>>) -> Self {
        let page_count = pages.len() as u64;
        let mut pages: VecDeque<Vec<T>> = pages.into();
        Self::new(move |start| {
            let values = pages.pop_front().unwrap_or_default();
            let next = start + 1;
            let page = Page {
                values,
                is_last_page: next >= page_count,
                next_page_start: Some(next),
            };
            async move { Ok::<_, anyhow::Error>(page) }.boxed()
        })
    }
}

impl<T> PageStream<T> {
    /// Stops fetching of further pages.
    pub fn stop_stream(&self) {
        self.valve.store(false, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        !self.valve.load(Ordering::Acquire)
    }
}

impl<T> Stream for PageStream<T> {
    type Item = anyhow::Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
