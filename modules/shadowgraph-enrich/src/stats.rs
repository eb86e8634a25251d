use serde::Serialize;

/// Stats from one enrichment run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EnrichStats {
    pub seeds_attempted: u32,
    pub seeds_succeeded: u32,
    pub seeds_failed: u32,
    pub lists_collected: u32,
    pub lists_skipped: u32,
    pub lists_failed: u32,
    pub members_captured: u32,
    pub accounts_upserted: u32,
    pub edges_upserted: u32,
    pub api_backfilled: u32,
}

impl std::fmt::Display for EnrichStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Enrichment Run Complete ===")?;
        writeln!(f, "Seeds attempted:   {}", self.seeds_attempted)?;
        writeln!(f, "Seeds succeeded:   {}", self.seeds_succeeded)?;
        writeln!(f, "Seeds failed:      {}", self.seeds_failed)?;
        writeln!(f, "Lists collected:   {}", self.lists_collected)?;
        writeln!(f, "Lists skipped:     {}", self.lists_skipped)?;
        writeln!(f, "Lists failed:      {}", self.lists_failed)?;
        writeln!(f, "Members captured:  {}", self.members_captured)?;
        writeln!(f, "Accounts upserted: {}", self.accounts_upserted)?;
        writeln!(f, "Edges upserted:    {}", self.edges_upserted)?;
        writeln!(f, "API backfilled:    {}", self.api_backfilled)?;
        Ok(())
    }
}
