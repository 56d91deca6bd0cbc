// This file is part of the ElectionGuard tally orchestrator.

//! Durable, per-task-type work queues: one durable AMQP queue per routing
//! key, `prefetch=1` so a consumer never holds more than one in-flight
//! chunk, at-least-once delivery.

use lapin::{
	options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions},
	types::FieldTable,
	BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use tally_common::task::TaskType;

use crate::{error::Result, message::QueueMessage};

/// Owns the AMQP connection and knows how to open publish/consume channels
/// for any task type's queue.
pub struct QueueSubstrate {
	connection: Connection,
}

impl QueueSubstrate {
	pub async fn connect(amqp_url: &str) -> Result<Self> {
		let connection = Connection::connect(
			amqp_url,
			ConnectionProperties::default()
				.with_executor(tokio_executor_trait::Tokio::current())
				.with_reactor(tokio_reactor_trait::Tokio),
		)
		.await?;
		let substrate = Self { connection };
		// Declare all four queues up front so publish/consume never race
		// against queue creation.
		for task_type in TaskType::ALL {
			substrate.declare(task_type).await?;
		}
		Ok(substrate)
	}

	async fn declare(&self, task_type: TaskType) -> Result<Channel> {
		let channel = self.connection.create_channel().await?;
		channel
			.queue_declare(task_type.queue_name(), QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
			.await?;
		Ok(channel)
	}

	/// Publish one chunk message onto its task type's queue. Called only by
	/// the scheduler, and only once a chunk descriptor has been transitioned
	/// from pending to queued.
	pub async fn publish(&self, message: &QueueMessage) -> Result<()> {
		let task_type = message.payload.task_type();
		let channel = self.declare(task_type).await?;
		let body = serde_json::to_vec(message)?;
		channel
			.basic_publish(
				"",
				task_type.queue_name(),
				BasicPublishOptions::default(),
				&body,
				BasicProperties::default().with_delivery_mode(2), // persistent
			)
			.await?
			.await?;
		Ok(())
	}

	/// Open a dedicated consumer channel for `task_type` with `prefetch=1`.
	/// One `QueueConsumer` is handed to each worker loop; a worker never
	/// holds more than one in-flight chunk.
	pub async fn consumer(&self, task_type: TaskType, consumer_tag: &str) -> Result<QueueConsumer> {
		let channel = self.connection.create_channel().await?;
		channel.basic_qos(1, BasicQosOptions::default()).await?;
		let consumer = channel
			.basic_consume(task_type.queue_name(), consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
			.await?;
		Ok(QueueConsumer { channel, consumer, task_type })
	}
}

/// A single prefetch=1 consumer bound to one task type's queue.
pub struct QueueConsumer {
	channel: Channel,
	consumer: Consumer,
	task_type: TaskType,
}

pub struct Delivery {
	inner: lapin::message::Delivery,
}

impl Delivery {
	pub async fn ack(self) -> Result<()> {
		self.inner.ack(BasicAckOptions::default()).await?;
		Ok(())
	}

	/// Requeue the message so the broker redelivers it, unless it has
	/// already been redelivered once, in which case we give up at the
	/// broker level. The scheduler's own `attempt_count`/backoff state
	/// machine is the authority on further retries; this is only a safety
	/// net against a worker crashing mid-chunk before it can even report
	/// failure.
	pub async fn nack(self) -> Result<()> {
		let requeue = !self.inner.redelivered;
		self.inner.nack(BasicNackOptions { requeue, ..Default::default() }).await?;
		Ok(())
	}
}

use futures::StreamExt;

impl QueueConsumer {
	/// Pull the next message, blocking the calling task until one arrives.
	/// This is one of the few places a worker loop suspends.
	pub async fn next(&mut self) -> Result<Option<(QueueMessage, Delivery)>> {
		match self.consumer.next().await {
			Some(Ok(delivery)) => {
				let message: QueueMessage = serde_json::from_slice(&delivery.data)?;
				Ok(Some((message, Delivery { inner: delivery })))
			}
			Some(Err(e)) => Err(e.into()),
			None => Ok(None),
		}
	}

	pub fn task_type(&self) -> TaskType {
		self.task_type
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}
}
