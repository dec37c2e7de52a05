//! Pipeline settings.

/// Flags controlling the behavior of the pass pipeline.
#[derive(Clone, Debug)]
pub struct Flags {
    enable_verifier: bool,
}

impl Flags {
    /// Create flags from a builder.
    pub fn new(builder: Builder) -> Self {
        Self {
            enable_verifier: builder.enable_verifier,
        }
    }

    /// Should the module be verified after each pipeline pass?
    ///
    /// Control-point instrumentation always verifies its own output,
    /// regardless of this flag.
    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new(Builder::default())
    }
}

/// Builder for [`Flags`].
#[derive(Clone, Debug)]
pub struct Builder {
    enable_verifier: bool,
}

impl Builder {
    /// Enable or disable verification between pipeline passes.
    pub fn enable_verifier(mut self, enable: bool) -> Self {
        self.enable_verifier = enable;
        self
    }

    /// Finish the builder.
    pub fn build(self) -> Flags {
        Flags::new(self)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            enable_verifier: true,
        }
    }
}
