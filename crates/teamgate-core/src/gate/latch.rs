/// Once-settable flag guarding the page's single navigation.
///
/// Owned by one gate, mutated only through `&mut`, so check-and-set is a
/// single step within whatever event turn reaches it first.
#[derive(Debug, Default)]
pub struct NavigationLatch {
    navigated: bool,
}

impl NavigationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the navigation. True only for the first caller.
    pub fn try_commit(&mut self) -> bool {
        if self.navigated {
            return false;
        }
        self.navigated = true;
        true
    }

    pub fn is_latched(&self) -> bool {
        self.navigated
    }
}
