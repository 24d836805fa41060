//! OpenCL sources of the benchmark kernels
//!
//! The host backend registers Rust equivalents under the same entry names.

pub const CONV_FP32_ENTRY: &str = "BenchmarkMatrixCalculate";
pub const BANDWIDTH_ENTRY: &str = "BenchmarkMatrixCopy";

/// FP32 convolution: `(data, conv_a, conv_b, params, out)`, `params = [width, height]`.
pub const CONV_FP32_SOURCE: &str = r#"
__kernel void BenchmarkMatrixCalculate(
    __global const float* MatrixIn,
    __global const float* ConvKernelA, __global const float* ConvKernelB,
    __global const float* ConvParam, __global float* MatrixOut
) {
    int width  = get_global_size(0);
    int height = get_global_size(1);

    int i = get_global_id(0);
    int j = get_global_id(1);

    int RangeSizeX = (int)ConvParam[0];
    int RangeSizeY = (int)ConvParam[1];

    int RangeCenterX = RangeSizeX / 2;
    int RangeCenterY = RangeSizeY / 2;

    float ResultValue = 0.0f;

    for (int kx = 0; kx < RangeSizeX; ++kx) {
        for (int ky = 0; ky < RangeSizeY; ++ky) {
            int InputX = i + kx - RangeCenterX;
            int InputY = j + ky - RangeCenterY;

            if (InputX >= 0 && InputX < width && InputY >= 0 && InputY < height) {
                float InputVal = MatrixIn[InputY * width + InputX];

                float ConvValueA = ConvKernelA[ky * RangeSizeX + kx];
                float ConvValueB = ConvKernelB[ky * RangeSizeX + kx];

                float Temp = InputVal * (ConvValueA + ConvValueB);

                // 32 blend steps: 32 + 2 flops per tap
                for (float idx = 0.0f; idx < 3.2f; idx += 0.1f) {
                    ResultValue += Temp * idx;
                }
            }
        }
    }
    MatrixOut[j * width + i] = ResultValue;
}
"#;

/// Element-wise copy: `(in, out)`.
pub const BANDWIDTH_SOURCE: &str = r#"
__kernel void BenchmarkMatrixCopy(
    __global const float* MatrixIn, __global float* MatrixOut
) {
    int width = get_global_size(0);

    int i = get_global_id(0);
    int j = get_global_id(1);

    MatrixOut[j * width + i] = MatrixIn[j * width + i];
}
"#;
