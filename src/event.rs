// RTMCTL DECISION LOG
// RECORDS EVERY KNOB PUSH THE CONTROL LOOP MAKES
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE RECORDING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

const MAX_DECISIONS: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionKind {
    Optimise,
    Randomise,
    QStep,
    Infeasible,
}

impl DecisionKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Optimise => "OPTIMISE",
            Self::Randomise => "RANDOMISE",
            Self::QStep => "QSTEP",
            Self::Infeasible => "INFEASIBLE",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Decision {
    pub ts_ns:     u64,
    pub kind:      DecisionKind,
    pub knobs:     u32,     // KNOBS PUSHED
    pub level:     i32,     // FREQUENCY LEVEL OR -1
    pub core:      i32,     // CORE OR -1
    pub predicted: f64,     // TARGET PREDICTION, NAN IF NONE
}

const EMPTY: Decision = Decision {
    ts_ns: 0,
    kind: DecisionKind::QStep,
    knobs: 0,
    level: -1,
    core: -1,
    predicted: f64::NAN,
};

pub struct DecisionLog {
    decisions: Vec<Decision>,
    head:      usize,
    len:       usize,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionLog {
    pub fn new() -> Self {
        Self {
            decisions: vec![EMPTY; MAX_DECISIONS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // OVERWRITES OLDEST ENTRY WHEN FULL
    pub fn record(&mut self, kind: DecisionKind, knobs: u32, level: i32, core: i32, predicted: f64) {
        self.decisions[self.head] = Decision {
            ts_ns: now_ns(),
            kind,
            knobs,
            level,
            core,
            predicted,
        };
        self.head = (self.head + 1) % MAX_DECISIONS;
        if self.len < MAX_DECISIONS {
            self.len += 1;
        }
    }

    // ITERATE DECISIONS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Decision> {
        let start = if self.len < MAX_DECISIONS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.decisions[(start + i) % MAX_DECISIONS]
        })
    }

    pub fn count(&self, kind: DecisionKind) -> usize {
        self.iter_chronological().filter(|d| d.kind == kind).count()
    }

    pub fn last(&self) -> Option<&Decision> {
        self.iter_chronological().last()
    }

    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let first = match iter.next() {
            Some(d) => d,
            None => return,
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<12} {:<6} {:<6} {:<6} {:<12}",
            "TIME_S", "KIND", "KNOBS", "LEVEL", "CORE", "PREDICTED");
        println!("{}", "-".repeat(56));

        for d in std::iter::once(first).chain(iter) {
            let elapsed_s = d.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.3} {:<12} {:<6} {:<6} {:<6} {:<12.3}",
                elapsed_s, d.kind.label(), d.knobs, d.level, d.core, d.predicted);
        }

        if self.len == MAX_DECISIONS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} DECISIONS)", MAX_DECISIONS);
        }
        println!("TOTAL DECISIONS: {}", self.len);
    }

    pub fn summary(&self) {
        if self.len == 0 {
            return;
        }

        let decisions: Vec<&Decision> = self.iter_chronological().collect();
        let elapsed_ns = match (decisions.first(), decisions.last()) {
            (Some(a), Some(b)) => b.ts_ns.saturating_sub(a.ts_ns),
            _ => 0,
        };

        println!("\n{}", "=".repeat(50));
        println!("RTMCTL SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  OPTIMISATIONS:     {}", self.count(DecisionKind::Optimise));
        println!("  RANDOMISATIONS:    {}", self.count(DecisionKind::Randomise));
        println!("  INFEASIBLE BOUNDS: {}", self.count(DecisionKind::Infeasible));
        println!("  Q-LEARNING STEPS:  {}", self.count(DecisionKind::QStep));

        let levels: Vec<i32> = decisions.iter()
            .filter(|d| d.kind == DecisionKind::QStep && d.level >= 0)
            .map(|d| d.level)
            .collect();
        if !levels.is_empty() {
            let mean = levels.iter().map(|&l| l as f64).sum::<f64>() / levels.len() as f64;
            println!("  MEAN FREQ LEVEL:   {:.1}", mean);
        }
        if let Some(d) = decisions.iter().rev().find(|d| d.kind == DecisionKind::Optimise) {
            println!("  LAST PREDICTION:   {:.3}", d.predicted);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_ns as f64 / 1_000_000_000.0);
    }
}

fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
