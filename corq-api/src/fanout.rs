//! Partition fan-out and result merging
//!
//! A frequency query against a partitioned corpus becomes one bus job per
//! partition. Partials are merged into a shared accumulator as they arrive
//! rather than buffered, so memory stays proportional to the distribution
//! size, not to the partition count. The fan-in barrier is strict: an error
//! is reported only after every in-flight partition has completed.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use corq_common::error::{Error, Result};
use corq_common::proto::{FreqDistribArgs, Operation};
use corq_common::results::FreqDistrib;

use crate::dispatch::Dispatcher;

/// Run a frequency distribution over all partitions of a corpus and merge
/// the partials. An empty partition list degrades to a single whole-corpus
/// submission.
pub async fn run_over_partitions(
    dispatcher: Arc<Dispatcher>,
    base: FreqDistribArgs,
    partitions: &[String],
    max_items: Option<usize>,
) -> Result<FreqDistrib> {
    if partitions.is_empty() {
        let reply = dispatcher
            .submit_and_wait(Operation::FreqDistrib(base))
            .await?;
        let mut ans = reply.result.into_freqs()?;
        ans.sort_by_freq_desc();
        if let Some(max) = max_items {
            ans.cut(max);
        }
        return Ok(ans);
    }

    debug!(partitions = partitions.len(), query = %base.query, "fanning out query");
    let acc = Arc::new(Mutex::new(FreqDistrib::default()));
    let mut tasks = JoinSet::new();
    for partition in partitions {
        let dispatcher = Arc::clone(&dispatcher);
        let acc = Arc::clone(&acc);
        let mut args = base.clone();
        args.partition_path = Some(partition.clone());
        tasks.spawn(async move {
            let reply = dispatcher
                .submit_and_wait(Operation::FreqDistrib(args))
                .await?;
            let partial = reply.result.into_freqs()?;
            acc.lock().await.merge_with(&partial);
            Ok::<(), Error>(())
        });
    }

    // drain every task before reporting anything; the first error wins but
    // never cancels the siblings
    let mut first_err: Option<Error> = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| Error::Internal(format!("fan-out task panicked: {}", e)));
        if let Err(err) = outcome.and_then(|r| r) {
            first_err.get_or_insert(err);
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    let mut ans = acc.lock().await.clone();
    ans.sort_by_freq_desc();
    if let Some(max) = max_items {
        ans.cut(max);
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::Semaphore;

    use corq_common::bus::{Broker, MemoryBus};
    use corq_common::proto::{Job, QueryResult, WorkerReply, DEFAULT_RESULT_CHANNEL_PREFIX};
    use corq_common::results::FreqDistribItem;

    fn partial(corpus_size: i64, conc_size: i64, items: &[(&str, i64)]) -> FreqDistrib {
        FreqDistrib {
            conc_size,
            corpus_size,
            partition_size: None,
            freqs: items
                .iter()
                .map(|(word, freq)| FreqDistribItem {
                    word: word.to_string(),
                    freq: *freq,
                    base: corpus_size,
                    ipm: *freq as f32 / corpus_size as f32 * 1e6,
                })
                .collect(),
            fcrit: "lemma 0".to_string(),
            error: None,
        }
    }

    struct Responder {
        bus: Arc<MemoryBus>,
        answers: HashMap<String, FreqDistrib>,
        answered: Arc<AtomicUsize>,
        /// partitions held back until the gate grants a permit; the error
        /// partition always answers immediately
        gate: Option<(Arc<Semaphore>, String)>,
    }

    impl Responder {
        fn spawn(self) {
            tokio::spawn(async move {
                let mut served = 0;
                let total = self.answers.len();
                while served < total {
                    let Some(raw) = self.bus.dequeue().await.unwrap() else {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        continue;
                    };
                    let job = Job::from_bytes(&raw).unwrap();
                    let partition = match &job.op {
                        Operation::FreqDistrib(args) => {
                            args.partition_path.clone().unwrap_or_default()
                        }
                        _ => panic!("unexpected operation"),
                    };
                    if let Some((gate, pass_through)) = &self.gate {
                        if partition != *pass_through {
                            gate.acquire().await.unwrap().forget();
                        }
                    }
                    let ans = self.answers.get(&partition).unwrap().clone();
                    let reply = WorkerReply {
                        worker_id: "w-fan".to_string(),
                        proc_begin: Utc::now(),
                        proc_end: Utc::now(),
                        has_user_error: false,
                        result: QueryResult::FreqDistrib(ans),
                    };
                    self.bus
                        .put_with_expiry(
                            &job.channel,
                            reply.to_bytes().unwrap(),
                            Duration::from_secs(600),
                        )
                        .await
                        .unwrap();
                    self.bus.publish(&job.channel, &job.channel).await.unwrap();
                    self.answered.fetch_add(1, Ordering::SeqCst);
                    served += 1;
                }
            });
        }
    }

    fn base_args() -> FreqDistribArgs {
        FreqDistribArgs {
            corpus_path: "/corpora/c".to_string(),
            partition_path: None,
            query: r#"[lemma="team"]"#.to_string(),
            crit: "lemma 0".to_string(),
            freq_limit: 0,
            max_items: 0,
            is_text_types: false,
        }
    }

    #[tokio::test]
    async fn test_three_partition_merge() {
        let bus = Arc::new(MemoryBus::new());
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), partial(1000, 10, &[("team", 10)]));
        answers.insert("p2".to_string(), partial(1000, 5, &[("team", 5), ("side", 2)]));
        answers.insert("p3.part".to_string(), partial(1000, 3, &[("squad", 3)]));
        let answered = Arc::new(AtomicUsize::new(0));
        Responder {
            bus: bus.clone(),
            answers,
            answered: answered.clone(),
            gate: None,
        }
        .spawn();

        let dispatcher = Arc::new(Dispatcher::new(
            bus,
            DEFAULT_RESULT_CHANNEL_PREFIX.to_string(),
            Duration::from_secs(5),
        ));
        let parts = vec!["p1".to_string(), "p2".to_string(), "p3.part".to_string()];
        let ans = run_over_partitions(dispatcher, base_args(), &parts, None)
            .await
            .unwrap();

        assert_eq!(ans.conc_size, 18);
        assert_eq!(ans.corpus_size, 1000);
        let team = ans.freqs.iter().find(|v| v.word == "team").unwrap();
        assert_eq!(team.freq, 15);
        assert_eq!(team.ipm, 15000.0);
        // merged output is sorted by descending frequency
        assert_eq!(ans.freqs[0].word, "team");
        assert_eq!(answered.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_waits_for_blocked_siblings() {
        let bus = Arc::new(MemoryBus::new());
        let mut failing = partial(1000, 0, &[]);
        failing.error = Some("partition data corrupted".to_string());
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), partial(1000, 10, &[("team", 10)]));
        answers.insert("p2".to_string(), failing);
        answers.insert("p3".to_string(), partial(1000, 3, &[("squad", 3)]));
        let answered = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        Responder {
            bus: bus.clone(),
            answers,
            answered: answered.clone(),
            gate: Some((gate.clone(), "p2".to_string())),
        }
        .spawn();

        let dispatcher = Arc::new(Dispatcher::new(
            bus,
            DEFAULT_RESULT_CHANNEL_PREFIX.to_string(),
            Duration::from_secs(5),
        ));
        let parts = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];
        let fanout = tokio::spawn(async move {
            run_over_partitions(dispatcher, base_args(), &parts, None).await
        });

        // two partitions are held back at the gate; even once the failing
        // one has answered, the fan-out must not report yet
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fanout.is_finished());

        gate.add_permits(2);
        let err = fanout.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert!(err.to_string().contains("partition data corrupted"));
        assert_eq!(answered.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unpartitioned_corpus_single_submission() {
        let bus = Arc::new(MemoryBus::new());
        let mut answers = HashMap::new();
        answers.insert("".to_string(), partial(1000, 15, &[("team", 15), ("side", 1)]));
        Responder {
            bus: bus.clone(),
            answers,
            answered: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
        .spawn();

        let dispatcher = Arc::new(Dispatcher::new(
            bus,
            DEFAULT_RESULT_CHANNEL_PREFIX.to_string(),
            Duration::from_secs(5),
        ));
        let ans = run_over_partitions(dispatcher, base_args(), &[], Some(1))
            .await
            .unwrap();
        assert_eq!(ans.conc_size, 15);
        assert_eq!(ans.freqs.len(), 1);
        assert_eq!(ans.freqs[0].word, "team");
    }
}
