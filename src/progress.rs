//! Обновления прогресса задачи
//!
//! Отправка идет по каналу tokio без ожидания получателя: если канал закрыт
//! или переполнен, обновление просто теряется.

use tokio::sync::mpsc::Sender;

/// Обновление прогресса для отправки клиенту
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Началась обработка
    Started,
    /// Анализ входного аудио
    Analyzing,
    /// Разделение на голос и фон
    Separating,
    /// Синхронизация сегментов
    Synchronizing {
        /// Завершено сегментов
        completed: usize,
        /// Всего сегментов
        total: usize,
    },
    /// Микширование и нормализация
    Mixing,
    /// Оценка качества
    Scoring,
    /// Обработка завершена
    Finished,
}

/// Отправляет обновление прогресса, не блокируя обработку
pub fn send_progress(sender: &Option<Sender<ProgressUpdate>>, update: ProgressUpdate) {
    if let Some(sender) = sender {
        let _ = sender.try_send(update);
    }
}
