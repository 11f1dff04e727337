use tracing::{debug, info, warn};

use crate::gate::LinkSource;
use crate::stats::{Subscription, VisitorFeed};
use crate::token::{nanoid, NANOID_LEN};
use crate::validate::{sanitize_file_name, validate_new_link, DEFAULT_MAX_IMAGE_BYTES};
use crate::{
    BlobStore, Clock, CoreError, CreatedLink, Link, LinkRepository, NewLink, ShareBase,
    StatsRepository, Token, TokenGenerator, VisitorStats,
};

/// Upper bound on token re-minting after a collision.
const MAX_TOKEN_ATTEMPTS: usize = 16;

/// Application service creating and resolving gated links and owning the
/// global visitor counter.
///
/// Generic over the document store (links and stats), blob store, token
/// generator, and clock so the domain stays testable without external
/// services.
pub struct LinkRegistry<R, S, B, G, C>
where
    R: LinkRepository,
    S: StatsRepository,
    B: BlobStore,
    G: TokenGenerator,
    C: Clock,
{
    links: R,
    stats: S,
    blobs: B,
    tokens: G,
    clock: C,
    feed: VisitorFeed,
    max_image_bytes: usize,
}

impl<R, S, B, G, C> LinkRegistry<R, S, B, G, C>
where
    R: LinkRepository,
    S: StatsRepository,
    B: BlobStore,
    G: TokenGenerator,
    C: Clock,
{
    pub fn new(links: R, stats: S, blobs: B, tokens: G, clock: C) -> Self {
        Self {
            links,
            stats,
            blobs,
            tokens,
            clock,
            feed: VisitorFeed::new(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    /// Override the cover image size limit.
    pub fn with_max_image_bytes(mut self, max: usize) -> Self {
        self.max_image_bytes = max;
        self
    }

    /// Create a new gated link: upload the image, mint a token, persist the
    /// record, and return it with its share URL.
    pub fn create(&self, input: NewLink, base: &ShareBase) -> Result<CreatedLink, CoreError> {
        let image = validate_new_link(&input, self.max_image_bytes)?;

        let key = format!("images/{}_{}", nanoid(NANOID_LEN), sanitize_file_name(&image.file_name));
        let image_url = self.blobs.put(&key, image).map_err(|e| match e {
            CoreError::Storage(_) => e,
            other => CoreError::Storage(other.to_string()),
        })?;
        debug!(key = %key, "image uploaded");

        let created_at = self.clock.now();
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = self.tokens.next_token();
            if self.links.get(&token)?.is_some() {
                warn!(token = %token, "token collision, re-minting");
                continue;
            }
            let link = Link {
                token: token.clone(),
                content_url: input.content_url.trim().to_string(),
                ads_url: input.ads_url.trim().to_string(),
                image_url: image_url.clone(),
                created_at,
            };
            match self.links.put(link.clone()) {
                Ok(()) => {
                    info!(token = %token, "link created");
                    return Ok(CreatedLink {
                        share_url: base.url_for(&token),
                        link,
                    });
                }
                Err(CoreError::AlreadyExists) => {
                    warn!(token = %token, "token taken during write, re-minting");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::Persistence("failed to mint a unique token".into()))
    }

    /// Point read by token.
    pub fn get(&self, token: &Token) -> Result<Link, CoreError> {
        self.links.get(token)?.ok_or(CoreError::NotFound)
    }

    /// Best-effort increment of the global visitor counter. Failures are
    /// logged and never reach the caller.
    pub fn increment_visitors(&self) {
        match self.stats.increment() {
            Ok(stats) => {
                self.feed.publish(stats.total);
            }
            Err(e) => warn!(err = ?e, "visitor increment failed"),
        }
    }

    /// Re-read the stored total and push it to subscribers if it moved.
    /// Picks up increments made by other processes sharing the store.
    pub fn refresh_visitor_total(&self) -> Result<bool, CoreError> {
        let current = self.stats.load_or_init()?;
        Ok(self.feed.publish(current.total))
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    /// Current visitor total, initializing the record if absent.
    pub fn visitor_total(&self) -> Result<VisitorStats, CoreError> {
        self.stats.load_or_init()
    }

    /// Subscribe to visitor total changes. The current value is delivered
    /// before this returns; later increments from this registry, and totals
    /// found by [`Self::refresh_visitor_total`], are pushed until the
    /// returned handle is unsubscribed or dropped.
    pub fn subscribe_visitor_total<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(u64) + Send + 'static,
    {
        let current = self.stats.load_or_init()?;
        Ok(self.feed.subscribe(current.total, callback))
    }
}

impl<R, S, B, G, C> LinkSource for LinkRegistry<R, S, B, G, C>
where
    R: LinkRepository,
    S: StatsRepository,
    B: BlobStore,
    G: TokenGenerator,
    C: Clock,
{
    fn get_link(&self, token: &Token) -> Result<Link, CoreError> {
        self.get(token)
    }

    fn increment_visitors(&self) {
        LinkRegistry::increment_visitors(self)
    }
}
