//! Stream plumbing: a source piped into a sink, and a chained transform.
//!
//! Run with: `cargo run --example pipeline`

use std::time::Duration;

use portlink::error::Result;
use portlink::stream::{
    combine, pipe, BoxFuture, Sink, SinkItem, Source, Step, StepContext, Transform,
};

fn double(v: i64, ctx: &mut StepContext<i64>) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.put(v * 2).await;
        Ok(())
    })
}

fn add_one(v: i64, ctx: &mut StepContext<i64>) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.put(v + 1).await;
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Source -> sink via pipe; the driver's return value becomes the pipe's
    // completion value.
    let source = Source::new(|out| async move {
        for v in [10, 20, 30] {
            tokio::time::sleep(Duration::from_millis(5)).await;
            out.put(v).await;
        }
        Ok(Some(3))
    });
    let sink = Sink::new(|v: i64| println!("sink received {v}"));

    let terminal = pipe(&source, &sink).await?;
    println!("pipe finished, terminal = {terminal:?}");

    // Two transform stages combined into one: (v * 2) + 1.
    let combined = combine(vec![Transform::new(double), Transform::new(add_one)]);
    let input = combined.input().handle();
    let mut out = combined.output().iter();

    for v in [1, 2, 3] {
        input.send(SinkItem::Value(v))?;
        // Arm the cursor before firing the cycle so the output is not missed.
        let next = out.next();
        combined.trigger();
        println!("transform {v} -> {:?}", next.await?);
    }

    input.send(SinkItem::End)?;
    let next = out.next();
    combined.trigger();
    if let Step::Done(value) = next.await? {
        println!("transform ended, terminal = {value:?}");
    }

    Ok(())
}
